use serde::{Deserialize, Serialize};

use crate::{
    decision::Limits,
    types::{ApplianceRole, NotificationKind},
};

/// One-shot notification latch. Persisted as a plain bool (`true` = armed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum Latch {
    Armed,
    Fired,
}

impl Latch {
    pub fn is_armed(self) -> bool {
        self == Self::Armed
    }

    pub fn arm(&mut self) {
        *self = Self::Armed;
    }

    /// Returns true exactly once per arming.
    pub fn fire(&mut self) -> bool {
        let was_armed = self.is_armed();
        *self = Self::Fired;
        was_armed
    }
}

impl From<bool> for Latch {
    fn from(armed: bool) -> Self {
        if armed {
            Self::Armed
        } else {
            Self::Fired
        }
    }
}

impl From<Latch> for bool {
    fn from(latch: Latch) -> Self {
        latch.is_armed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerFlags {
    pub below_limit_trigger_armed: Latch,
    pub above_limit_trigger_armed: Latch,
    pub in_range_trigger_armed: Latch,
    pub heating_blocked_trigger: Latch,
    pub cooling_blocked_trigger: Latch,
    pub heating_safety_off_trigger: Latch,
    pub cooling_safety_off_trigger: Latch,
}

impl Default for TriggerFlags {
    fn default() -> Self {
        Self {
            below_limit_trigger_armed: Latch::Armed,
            above_limit_trigger_armed: Latch::Armed,
            // Starting inside the band is not news.
            in_range_trigger_armed: Latch::Fired,
            heating_blocked_trigger: Latch::Armed,
            cooling_blocked_trigger: Latch::Armed,
            heating_safety_off_trigger: Latch::Armed,
            cooling_safety_off_trigger: Latch::Armed,
        }
    }
}

impl TriggerFlags {
    /// Threshold crossings use strict comparisons: touching a limit is not a crossing.
    pub fn observe_temperature(&mut self, temp: f32, limits: Limits) -> Option<NotificationKind> {
        if !temp.is_finite() {
            return None;
        }

        if let Some(low) = limits.low {
            if temp < low {
                self.above_limit_trigger_armed.arm();
                self.in_range_trigger_armed.arm();
                return self
                    .below_limit_trigger_armed
                    .fire()
                    .then_some(NotificationKind::TempBelowLimit);
            }
        }

        if let Some(high) = limits.high {
            if temp > high {
                self.below_limit_trigger_armed.arm();
                self.in_range_trigger_armed.arm();
                return self
                    .above_limit_trigger_armed
                    .fire()
                    .then_some(NotificationKind::TempAboveLimit);
            }
        }

        if limits.is_complete() && self.in_range_trigger_armed.fire() {
            return Some(NotificationKind::TempInRange);
        }

        None
    }

    pub fn blocked_latch(&mut self, role: ApplianceRole) -> &mut Latch {
        match role {
            ApplianceRole::Heater => &mut self.heating_blocked_trigger,
            ApplianceRole::Cooler => &mut self.cooling_blocked_trigger,
        }
    }

    pub fn safety_off_latch(&mut self, role: ApplianceRole) -> &mut Latch {
        match role {
            ApplianceRole::Heater => &mut self.heating_safety_off_trigger,
            ApplianceRole::Cooler => &mut self.cooling_safety_off_trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIMITS: Limits = Limits {
        low: Some(73.0),
        high: Some(75.0),
    };

    fn fired(flags: &mut TriggerFlags, temps: &[f32]) -> Vec<NotificationKind> {
        temps
            .iter()
            .filter_map(|temp| flags.observe_temperature(*temp, LIMITS))
            .collect()
    }

    #[test]
    fn falling_temperature_fires_below_once() {
        let mut flags = TriggerFlags::default();
        let kinds = fired(&mut flags, &[74.5, 74.0, 73.5, 72.9, 72.0, 71.0, 70.0]);

        assert_eq!(kinds, vec![NotificationKind::TempBelowLimit]);
        assert!(!flags.below_limit_trigger_armed.is_armed());
        assert!(flags.above_limit_trigger_armed.is_armed());
    }

    #[test]
    fn opposite_crossing_rearms() {
        let mut flags = TriggerFlags::default();
        let kinds = fired(&mut flags, &[72.0, 71.0, 76.0, 77.0, 72.0]);

        assert_eq!(
            kinds,
            vec![
                NotificationKind::TempBelowLimit,
                NotificationKind::TempAboveLimit,
                NotificationKind::TempBelowLimit,
            ]
        );
    }

    #[test]
    fn touching_a_limit_is_not_a_crossing() {
        let mut flags = TriggerFlags::default();
        assert!(fired(&mut flags, &[73.0, 75.0, 73.0]).is_empty());
    }

    #[test]
    fn return_to_band_fires_in_range_once() {
        let mut flags = TriggerFlags::default();
        let kinds = fired(&mut flags, &[74.0, 72.0, 73.5, 74.0, 74.5]);

        assert_eq!(
            kinds,
            vec![
                NotificationKind::TempBelowLimit,
                NotificationKind::TempInRange
            ]
        );
    }

    #[test]
    fn latch_persists_as_bool() {
        let flags = TriggerFlags {
            below_limit_trigger_armed: Latch::Fired,
            ..TriggerFlags::default()
        };
        let value = serde_json::to_value(flags).unwrap();

        assert_eq!(value["below_limit_trigger_armed"], serde_json::json!(false));
        assert_eq!(value["above_limit_trigger_armed"], serde_json::json!(true));

        let restored: TriggerFlags = serde_json::from_value(value).unwrap();
        assert_eq!(restored, flags);
    }
}

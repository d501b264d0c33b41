use crate::types::{ApplianceRole, PlugAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    On,
    Off,
    Maintain,
}

impl ControlAction {
    pub fn plug_action(self) -> Option<PlugAction> {
        match self {
            Self::On => Some(PlugAction::On),
            Self::Off => Some(PlugAction::Off),
            Self::Maintain => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Disabled,
    BelowLow,
    AboveHigh,
    LimitMissing,
    InvalidReading,
    InBand,
}

impl DecisionReason {
    /// Reasons that force an appliance off because the loop cannot trust its inputs.
    pub fn is_safety(self) -> bool {
        matches!(self, Self::LimitMissing | Self::InvalidReading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::BelowLow => "below low limit",
            Self::AboveHigh => "above high limit",
            Self::LimitMissing => "limit missing",
            Self::InvalidReading => "invalid reading",
            Self::InBand => "in band",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplianceDecision {
    pub action: ControlAction,
    pub reason: DecisionReason,
}

impl ApplianceDecision {
    const fn new(action: ControlAction, reason: DecisionReason) -> Self {
        Self { action, reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlDecision {
    pub heat: ApplianceDecision,
    pub cool: ApplianceDecision,
}

impl ControlDecision {
    pub fn all_off(reason: DecisionReason) -> Self {
        let off = ApplianceDecision::new(ControlAction::Off, reason);
        Self {
            heat: off,
            cool: off,
        }
    }

    pub fn for_role(&self, role: ApplianceRole) -> ApplianceDecision {
        match role {
            ApplianceRole::Heater => self.heat,
            ApplianceRole::Cooler => self.cool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limits {
    pub low: Option<f32>,
    pub high: Option<f32>,
}

impl Limits {
    // Drops non-finite limits, and both limits when they are inverted or equal.
    pub fn validated(low: Option<f32>, high: Option<f32>) -> Self {
        let low = low.filter(|value| value.is_finite());
        let high = high.filter(|value| value.is_finite());
        match (low, high) {
            (Some(low), Some(high)) if high <= low => Self::default(),
            _ => Self { low, high },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.low.is_some() && self.high.is_some()
    }
}

pub fn decide(
    temp: f32,
    low: Option<f32>,
    high: Option<f32>,
    enable_heat: bool,
    enable_cool: bool,
) -> ControlDecision {
    let limits = Limits::validated(low, high);
    ControlDecision {
        heat: decide_heating(temp, limits, enable_heat),
        cool: decide_cooling(temp, limits, enable_cool),
    }
}

fn decide_heating(temp: f32, limits: Limits, enabled: bool) -> ApplianceDecision {
    use ControlAction::{Maintain, Off, On};

    if !enabled {
        return ApplianceDecision::new(Off, DecisionReason::Disabled);
    }
    if !temp.is_finite() {
        return ApplianceDecision::new(Off, DecisionReason::InvalidReading);
    }

    match (limits.low, limits.high) {
        (Some(low), _) if temp <= low => ApplianceDecision::new(On, DecisionReason::BelowLow),
        (_, Some(high)) if temp >= high => ApplianceDecision::new(Off, DecisionReason::AboveHigh),
        // No ceiling: never hold heat.
        (_, None) => ApplianceDecision::new(Off, DecisionReason::LimitMissing),
        _ => ApplianceDecision::new(Maintain, DecisionReason::InBand),
    }
}

fn decide_cooling(temp: f32, limits: Limits, enabled: bool) -> ApplianceDecision {
    use ControlAction::{Maintain, Off, On};

    if !enabled {
        return ApplianceDecision::new(Off, DecisionReason::Disabled);
    }
    if !temp.is_finite() {
        return ApplianceDecision::new(Off, DecisionReason::InvalidReading);
    }

    match (limits.low, limits.high) {
        (_, Some(high)) if temp >= high => ApplianceDecision::new(On, DecisionReason::AboveHigh),
        (Some(low), _) if temp <= low => ApplianceDecision::new(Off, DecisionReason::BelowLow),
        (None, _) => ApplianceDecision::new(Off, DecisionReason::LimitMissing),
        _ => ApplianceDecision::new(Maintain, DecisionReason::InBand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn actions(decision: ControlDecision) -> (ControlAction, ControlAction) {
        (decision.heat.action, decision.cool.action)
    }

    #[test]
    fn heating_sequence_holds_inside_band() {
        let observed: Vec<ControlAction> = [80.0, 73.0, 72.0, 73.0]
            .into_iter()
            .map(|temp| decide(temp, Some(73.0), Some(75.0), true, false).heat.action)
            .collect();

        assert_eq!(
            observed,
            vec![
                ControlAction::Off,
                ControlAction::On,
                ControlAction::On,
                ControlAction::On
            ]
        );
    }

    #[test]
    fn limits_are_inclusive_for_control() {
        let at_low = decide(73.0, Some(73.0), Some(75.0), true, true);
        assert_eq!(actions(at_low), (ControlAction::On, ControlAction::Off));

        let at_high = decide(75.0, Some(73.0), Some(75.0), true, true);
        assert_eq!(actions(at_high), (ControlAction::Off, ControlAction::On));
    }

    #[test]
    fn disabled_appliances_are_turned_off() {
        let decision = decide(60.0, Some(73.0), Some(75.0), false, false);
        assert_eq!(decision.heat.reason, DecisionReason::Disabled);
        assert_eq!(decision.cool.reason, DecisionReason::Disabled);
        assert_eq!(actions(decision), (ControlAction::Off, ControlAction::Off));
    }

    #[test]
    fn missing_ceiling_never_maintains_heat() {
        let decision = decide(74.0, Some(73.0), None, true, true);
        assert_eq!(decision.heat.action, ControlAction::Off);
        assert_eq!(decision.heat.reason, DecisionReason::LimitMissing);
        // Cooling has no high limit to reach, but its floor is known.
        assert_eq!(decision.cool.action, ControlAction::Maintain);
    }

    #[test]
    fn inverted_limits_turn_everything_off() {
        let decision = decide(74.0, Some(76.0), Some(72.0), true, true);
        assert_eq!(decision.heat.reason, DecisionReason::LimitMissing);
        assert_eq!(decision.cool.reason, DecisionReason::LimitMissing);
        assert_eq!(actions(decision), (ControlAction::Off, ControlAction::Off));
    }

    #[test]
    fn nan_reading_is_never_interpreted() {
        let decision = decide(f32::NAN, Some(73.0), Some(75.0), true, true);
        assert_eq!(decision, ControlDecision::all_off(DecisionReason::InvalidReading));
    }

    #[test]
    fn non_finite_limits_are_dropped() {
        assert_eq!(
            Limits::validated(Some(f32::INFINITY), Some(75.0)),
            Limits {
                low: None,
                high: Some(75.0)
            }
        );
        assert!(!Limits::validated(Some(70.0), Some(f32::NAN)).is_complete());
    }

    proptest! {
        #[test]
        fn prop_below_band_heats(low in -20.0f32..40.0, gap in 0.1f32..20.0, below in 0.01f32..30.0) {
            let high = low + gap;
            let temp = low - below;
            prop_assume!(temp < low && low < high);
            let decision = decide(temp, Some(low), Some(high), true, true);
            prop_assert_eq!(actions(decision), (ControlAction::On, ControlAction::Off));
        }

        #[test]
        fn prop_above_band_cools(low in -20.0f32..40.0, gap in 0.1f32..20.0, above in 0.01f32..30.0) {
            let high = low + gap;
            let temp = high + above;
            prop_assume!(temp > high && high > low);
            let decision = decide(temp, Some(low), Some(high), true, true);
            prop_assert_eq!(actions(decision), (ControlAction::Off, ControlAction::On));
        }

        #[test]
        fn prop_inside_band_maintains(low in -20.0f32..40.0, gap in 0.1f32..20.0, frac in 0.01f32..0.99) {
            let high = low + gap;
            let temp = low + gap * frac;
            prop_assume!(low < temp && temp < high);
            let decision = decide(temp, Some(low), Some(high), true, true);
            prop_assert_eq!(actions(decision), (ControlAction::Maintain, ControlAction::Maintain));
        }

        #[test]
        fn prop_missing_limit_never_maintains(temp in -40.0f32..150.0, limit in -20.0f32..60.0) {
            let heat = decide(temp, Some(limit), None, true, true).heat;
            prop_assert_ne!(heat.action, ControlAction::Maintain);

            let cool = decide(temp, None, Some(limit), true, true).cool;
            prop_assert_ne!(cool.action, ControlAction::Maintain);
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::{config::RuntimeConfig, types::ApplianceRole};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub low_limit: Option<f32>,
    pub high_limit: Option<f32>,
    pub enable_heating: Option<bool>,
    pub enable_cooling: Option<bool>,
    pub heater_endpoint: Option<String>,
    pub cooler_endpoint: Option<String>,
    pub sensor_id: Option<String>,
    pub notify_temperature_alerts: Option<bool>,
    pub notify_device_errors: Option<bool>,
    pub notify_safety_events: Option<bool>,
    pub monitor_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },
    #[error("high_limit ({high}) must be greater than low_limit ({low})")]
    InvertedLimits { low: f32, high: f32 },
    #[error("{field} may only contain letters, digits, '-', '_', '.' or ':'")]
    InvalidIdentifier { field: &'static str },
    #[error("heater and cooler cannot share endpoint {0}")]
    SharedEndpoint(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOutcome {
    pub changed: bool,
    pub replaced_endpoints: Vec<(ApplianceRole, Option<String>)>,
}

impl SettingsUpdate {
    pub fn apply(&self, runtime: &mut RuntimeConfig) -> Result<SettingsOutcome, SettingsError> {
        let mut next = runtime.clone();

        if let Some(low) = self.low_limit {
            next.low_limit = Some(finite("low_limit", low)?);
        }
        if let Some(high) = self.high_limit {
            next.high_limit = Some(finite("high_limit", high)?);
        }
        if let (Some(low), Some(high)) = (next.low_limit, next.high_limit) {
            if high <= low {
                return Err(SettingsError::InvertedLimits { low, high });
            }
        }

        if let Some(value) = self.enable_heating {
            next.enable_heating = value;
        }
        if let Some(value) = self.enable_cooling {
            next.enable_cooling = value;
        }
        if let Some(value) = &self.heater_endpoint {
            next.heater_endpoint = identifier("heater_endpoint", value)?;
        }
        if let Some(value) = &self.cooler_endpoint {
            next.cooler_endpoint = identifier("cooler_endpoint", value)?;
        }
        if let Some(value) = &self.sensor_id {
            next.sensor_id = identifier("sensor_id", value)?;
        }
        validate_identities(&next)?;

        if let Some(value) = self.notify_temperature_alerts {
            next.notify_temperature_alerts = value;
        }
        if let Some(value) = self.notify_device_errors {
            next.notify_device_errors = value;
        }
        if let Some(value) = self.notify_safety_events {
            next.notify_safety_events = value;
        }
        if let Some(value) = self.monitor_active {
            next.monitor_active = value;
        }

        let replaced_endpoints = ApplianceRole::ALL
            .into_iter()
            .filter(|role| runtime.endpoint(*role) != next.endpoint(*role))
            .map(|role| (role, runtime.endpoint(role).map(str::to_owned)))
            .collect();

        let changed = next != *runtime;
        *runtime = next;
        Ok(SettingsOutcome {
            changed,
            replaced_endpoints,
        })
    }
}

fn finite(field: &'static str, value: f32) -> Result<f32, SettingsError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SettingsError::NonFinite { field })
    }
}

fn identifier(field: &'static str, value: &str) -> Result<Option<String>, SettingsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !is_topic_safe(trimmed) {
        return Err(SettingsError::InvalidIdentifier { field });
    }
    Ok(Some(trimmed.to_string()))
}

// Identifiers become MQTT topic levels, so separators and wildcards are refused.
fn is_topic_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

pub fn validate_identities(runtime: &RuntimeConfig) -> Result<(), SettingsError> {
    let fields = [
        ("heater_endpoint", runtime.endpoint(ApplianceRole::Heater)),
        ("cooler_endpoint", runtime.endpoint(ApplianceRole::Cooler)),
        ("sensor_id", runtime.sensor_id.as_deref().map(str::trim)),
    ];
    for (field, value) in fields {
        if value.is_some_and(|value| !is_topic_safe(value)) {
            return Err(SettingsError::InvalidIdentifier { field });
        }
    }

    if let (Some(heater), Some(cooler)) = (
        runtime.endpoint(ApplianceRole::Heater),
        runtime.endpoint(ApplianceRole::Cooler),
    ) {
        if heater == cooler {
            return Err(SettingsError::SharedEndpoint(heater.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_with_endpoints;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_update_only_touches_given_fields() {
        let mut runtime = runtime_with_endpoints();
        let update = SettingsUpdate {
            low_limit: Some(66.0),
            high_limit: Some(68.0),
            ..SettingsUpdate::default()
        };

        let outcome = update.apply(&mut runtime).unwrap();

        assert!(outcome.changed);
        assert!(outcome.replaced_endpoints.is_empty());
        assert_eq!(runtime.low_limit, Some(66.0));
        assert_eq!(runtime.high_limit, Some(68.0));
        assert!(runtime.enable_heating);
    }

    #[test]
    fn inverted_limits_leave_runtime_untouched() {
        let mut runtime = runtime_with_endpoints();
        let before = runtime.clone();
        let update = SettingsUpdate {
            high_limit: Some(70.0),
            ..SettingsUpdate::default()
        };

        assert_eq!(
            update.apply(&mut runtime),
            Err(SettingsError::InvertedLimits {
                low: 73.0,
                high: 70.0
            })
        );
        assert_eq!(runtime, before);
    }

    #[test]
    fn rejects_non_finite_and_topic_breaking_values() {
        let mut runtime = runtime_with_endpoints();

        let nan = SettingsUpdate {
            low_limit: Some(f32::NAN),
            ..SettingsUpdate::default()
        };
        assert_eq!(
            nan.apply(&mut runtime),
            Err(SettingsError::NonFinite { field: "low_limit" })
        );

        let wildcard = SettingsUpdate {
            heater_endpoint: Some("plugs/#".to_string()),
            ..SettingsUpdate::default()
        };
        assert_eq!(
            wildcard.apply(&mut runtime),
            Err(SettingsError::InvalidIdentifier {
                field: "heater_endpoint"
            })
        );
    }

    #[test]
    fn endpoint_swap_is_reported_and_sharing_refused() {
        let mut runtime = runtime_with_endpoints();

        let shared = SettingsUpdate {
            cooler_endpoint: Some("heater-plug".to_string()),
            ..SettingsUpdate::default()
        };
        assert_eq!(
            shared.apply(&mut runtime),
            Err(SettingsError::SharedEndpoint("heater-plug".to_string()))
        );

        let replace = SettingsUpdate {
            cooler_endpoint: Some(" ".to_string()),
            ..SettingsUpdate::default()
        };
        let outcome = replace.apply(&mut runtime).unwrap();
        assert_eq!(
            outcome.replaced_endpoints,
            vec![(ApplianceRole::Cooler, Some("cooler-plug".to_string()))]
        );
        assert_eq!(runtime.cooler_endpoint, None);
    }

    #[test]
    fn identical_update_is_not_a_change() {
        let mut runtime = runtime_with_endpoints();
        let update = SettingsUpdate {
            enable_heating: Some(true),
            heater_endpoint: Some("heater-plug".to_string()),
            ..SettingsUpdate::default()
        };

        assert!(!update.apply(&mut runtime).unwrap().changed);
    }
}

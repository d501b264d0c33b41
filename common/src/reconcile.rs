use serde_json::{Map, Value};

use crate::{
    config::RuntimeConfig,
    settings::{validate_identities, SettingsError},
};

pub const RUNTIME_OWNED_KEYS: &[&str] = &[
    "monitor_active",
    "status",
    "current_temp",
    "heater_on",
    "heater_pending",
    "heater_pending_since",
    "heater_pending_action",
    "heater_error",
    "heater_error_notified",
    "heater_blocked_ticks",
    "cooler_on",
    "cooler_pending",
    "cooler_pending_since",
    "cooler_pending_action",
    "cooler_error",
    "cooler_error_notified",
    "cooler_blocked_ticks",
    "below_limit_trigger_armed",
    "above_limit_trigger_armed",
    "in_range_trigger_armed",
    "heating_blocked_trigger",
    "cooling_blocked_trigger",
    "heating_safety_off_trigger",
    "cooling_safety_off_trigger",
];

pub const NULL_PROTECTED_KEYS: &[&str] = &["low_limit", "high_limit"];

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("disk snapshot is not a JSON object")]
    NotAnObject,
    #[error("failed to serialize runtime state")]
    Serialize(#[source] serde_json::Error),
    #[error("merged configuration is invalid")]
    Invalid(#[source] serde_json::Error),
    #[error("merged configuration rejected")]
    Rejected(#[source] SettingsError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub changed_keys: Vec<String>,
    pub ignored_keys: Vec<String>,
    pub preserved_keys: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.changed_keys.is_empty()
    }
}

pub fn strip_runtime_owned(snapshot: &mut Map<String, Value>) -> Vec<String> {
    RUNTIME_OWNED_KEYS
        .iter()
        .filter(|key| snapshot.remove(**key).is_some())
        .map(|key| (*key).to_string())
        .collect()
}

pub fn reconcile(
    snapshot: Value,
    runtime: &RuntimeConfig,
) -> Result<(RuntimeConfig, ReconcileReport), ReconcileError> {
    let Value::Object(mut disk) = snapshot else {
        return Err(ReconcileError::NotAnObject);
    };

    let mut report = ReconcileReport {
        ignored_keys: strip_runtime_owned(&mut disk),
        ..ReconcileReport::default()
    };

    let before = to_map(runtime)?;
    for key in NULL_PROTECTED_KEYS {
        let disk_null = disk.get(*key).is_some_and(Value::is_null);
        let runtime_set = before.get(*key).is_some_and(|value| !value.is_null());
        if disk_null && runtime_set {
            disk.remove(*key);
            report.preserved_keys.push((*key).to_string());
        }
    }

    let mut merged = before.clone();
    for (key, value) in disk {
        // Unknown keys would be dropped by deserialization anyway.
        if merged.contains_key(&key) {
            merged.insert(key, value);
        }
    }

    let mut next: RuntimeConfig =
        serde_json::from_value(Value::Object(merged)).map_err(ReconcileError::Invalid)?;
    next.controller.sanitize();
    validate_identities(&next).map_err(ReconcileError::Rejected)?;

    let after = to_map(&next)?;
    report.changed_keys = after
        .iter()
        .filter(|(key, value)| before.get(key.as_str()) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();

    Ok((next, report))
}

fn to_map(runtime: &RuntimeConfig) -> Result<Map<String, Value>, ReconcileError> {
    match serde_json::to_value(runtime).map_err(ReconcileError::Serialize)? {
        Value::Object(map) => Ok(map),
        _ => Err(ReconcileError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil::runtime_with_endpoints, types::PlugAction};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn null_limit_on_disk_does_not_clear_runtime() {
        let mut runtime = runtime_with_endpoints();
        runtime.low_limit = Some(74.0);
        runtime.high_limit = Some(76.0);

        let (next, report) =
            reconcile(json!({"low_limit": null, "high_limit": 77.0}), &runtime).unwrap();

        assert_eq!(next.low_limit, Some(74.0));
        assert_eq!(next.high_limit, Some(77.0));
        assert_eq!(report.preserved_keys, vec!["low_limit".to_string()]);
        assert_eq!(report.changed_keys, vec!["high_limit".to_string()]);
    }

    #[test]
    fn null_limit_is_accepted_when_runtime_has_none() {
        let mut runtime = runtime_with_endpoints();
        runtime.high_limit = None;

        let (next, report) = reconcile(json!({"high_limit": null}), &runtime).unwrap();

        assert_eq!(next.high_limit, None);
        assert!(report.preserved_keys.is_empty());
    }

    #[test]
    fn runtime_owned_state_survives_reload() {
        let mut runtime = runtime_with_endpoints();
        runtime.heater_on = true;
        runtime.heater_pending = true;
        runtime.heater_pending_action = Some(PlugAction::Off);
        runtime.monitor_active = true;

        let disk = json!({
            "heater_on": false,
            "heater_pending": false,
            "heater_pending_action": null,
            "monitor_active": false,
            "below_limit_trigger_armed": false,
            "status": "stopped",
            "enable_heating": false,
        });
        let (next, report) = reconcile(disk, &runtime).unwrap();

        assert!(next.heater_on);
        assert!(next.heater_pending);
        assert_eq!(next.heater_pending_action, Some(PlugAction::Off));
        assert!(next.monitor_active);
        assert!(next.triggers.below_limit_trigger_armed.is_armed());
        assert!(!next.enable_heating);
        assert_eq!(report.changed_keys, vec!["enable_heating".to_string()]);
        assert_eq!(report.ignored_keys.len(), 6);
    }

    #[test]
    fn disk_wins_for_configuration() {
        let runtime = runtime_with_endpoints();

        let disk = json!({
            "heater_endpoint": "kitchen-plug",
            "sensor_id": "tilt-red",
            "notify_temperature_alerts": false,
            "unknown_field": 12,
        });
        let (next, report) = reconcile(disk, &runtime).unwrap();

        assert_eq!(next.heater_endpoint.as_deref(), Some("kitchen-plug"));
        assert_eq!(next.sensor_id.as_deref(), Some("tilt-red"));
        assert!(!next.notify_temperature_alerts);
        assert_eq!(
            report.changed_keys,
            vec![
                "heater_endpoint".to_string(),
                "notify_temperature_alerts".to_string(),
                "sensor_id".to_string(),
            ]
        );
    }

    #[test]
    fn unchanged_snapshot_reports_nothing() {
        let runtime = runtime_with_endpoints();
        let disk = serde_json::to_value(&runtime).unwrap();

        let (next, report) = reconcile(disk, &runtime).unwrap();

        assert_eq!(next, runtime);
        assert!(!report.changed());
    }

    #[test]
    fn corrupt_snapshot_is_rejected() {
        let runtime = runtime_with_endpoints();

        assert!(matches!(
            reconcile(json!({"low_limit": "cold"}), &runtime),
            Err(ReconcileError::Invalid(_))
        ));
        assert!(matches!(
            reconcile(json!([1, 2, 3]), &runtime),
            Err(ReconcileError::NotAnObject)
        ));
    }

    #[test]
    fn endpoint_conflicts_on_disk_are_rejected() {
        let runtime = runtime_with_endpoints();

        assert!(matches!(
            reconcile(json!({"cooler_endpoint": "heater-plug"}), &runtime),
            Err(ReconcileError::Rejected(SettingsError::SharedEndpoint(endpoint)))
                if endpoint == "heater-plug"
        ));
        assert!(matches!(
            reconcile(json!({"heater_endpoint": " heater-plug "}), &runtime),
            Ok(_)
        ));
        assert!(matches!(
            reconcile(json!({"sensor_id": "tilt/#"}), &runtime),
            Err(ReconcileError::Rejected(SettingsError::InvalidIdentifier {
                field: "sensor_id"
            }))
        ));
    }
}

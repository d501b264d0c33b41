use crate::{
    config::RuntimeConfig,
    types::{ApplianceRole, CommandResult, Notification, NotificationKind, PlugAction},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ResultReport {
    pub role: ApplianceRole,
    pub success: bool,
    pub state_changed: bool,
    pub now_on: bool,
    pub stale: bool,
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRecovery {
    pub role: ApplianceRole,
    pub assumed_action: PlugAction,
    pub state_changed: bool,
}

pub fn apply_result(runtime: &mut RuntimeConfig, result: &CommandResult) -> Option<ResultReport> {
    let role = runtime.role_for_endpoint(&result.endpoint)?;
    let mut state = runtime.appliance(role);

    let matches_pending = !state.pending || state.pending_action == Some(result.action);
    if matches_pending {
        state.clear_pending();
    }

    let mut report = ResultReport {
        role,
        success: result.success,
        state_changed: false,
        now_on: state.on,
        stale: !matches_pending,
        notification: None,
    };

    if result.success {
        let on = result.action.is_on();
        // Late results are authoritative too: last write wins.
        if state.on != on {
            state.on = on;
            report.state_changed = true;
        }
        report.now_on = on;
        state.error = false;
        state.error_notified = false;
        runtime.set_appliance(role, state);
    } else {
        runtime.set_appliance(role, state);
        let reason = result.error.as_deref().unwrap_or("no error detail");
        report.notification = record_failure(runtime, role, result.action, reason);
    }

    Some(report)
}

pub fn record_failure(
    runtime: &mut RuntimeConfig,
    role: ApplianceRole,
    action: PlugAction,
    reason: &str,
) -> Option<Notification> {
    let endpoint = runtime.endpoint(role).unwrap_or("unconfigured").to_owned();
    let notify_enabled = runtime.notify_device_errors;

    runtime.update_appliance(role, |state| {
        state.error = true;
        if state.error_notified {
            return None;
        }
        state.error_notified = true;
        notify_enabled.then(|| {
            Notification::new(
                NotificationKind::device_error(role),
                format!(
                    "{} plug {endpoint} failed to turn {}: {reason}",
                    capitalized(role),
                    action.as_str()
                ),
            )
        })
    })
}

/// Writes off a command whose result never arrived by assuming it succeeded.
///
/// This is a heuristic: favouring eventual convergence keeps a silent plug from
/// blocking the opposite command forever. A genuine result arriving later still wins.
pub fn recover_stale_pending(
    runtime: &mut RuntimeConfig,
    role: ApplianceRole,
    now_ms: u64,
) -> Option<PendingRecovery> {
    let timeout_ms = runtime.controller.pending_timeout_ms;

    runtime.update_appliance(role, |state| {
        if !state.pending {
            return None;
        }
        let expired = state.pending_age_ms(now_ms).map_or(true, |age| age >= timeout_ms);
        if !expired {
            return None;
        }

        let recovery = state.pending_action.map(|action| {
            let state_changed = state.on != action.is_on();
            state.on = action.is_on();
            PendingRecovery {
                role,
                assumed_action: action,
                state_changed,
            }
        });
        state.clear_pending();
        recovery
    })
}

fn capitalized(role: ApplianceRole) -> &'static str {
    match role {
        ApplianceRole::Heater => "Heater",
        ApplianceRole::Cooler => "Cooler",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runtime_with_endpoints;
    use pretty_assertions::assert_eq;

    fn result(action: PlugAction, success: bool) -> CommandResult {
        CommandResult {
            endpoint: "heater-plug".to_string(),
            action,
            success,
            error: (!success).then(|| "timed out".to_string()),
        }
    }

    fn pending(runtime: &mut RuntimeConfig, action: PlugAction, since: u64) {
        runtime.update_appliance(ApplianceRole::Heater, |state| state.mark_pending(action, since));
    }

    #[test]
    fn success_confirms_state_once() {
        let mut runtime = runtime_with_endpoints();
        pending(&mut runtime, PlugAction::On, 0);

        let first = apply_result(&mut runtime, &result(PlugAction::On, true)).unwrap();
        assert!(first.state_changed);
        assert!(runtime.heater_on);
        assert!(!runtime.heater_pending);

        let repeat = apply_result(&mut runtime, &result(PlugAction::On, true)).unwrap();
        assert!(!repeat.state_changed);
        assert!(runtime.heater_on);
    }

    #[test]
    fn failure_keeps_state_and_notifies_once_per_streak() {
        let mut runtime = runtime_with_endpoints();
        pending(&mut runtime, PlugAction::On, 0);

        let first = apply_result(&mut runtime, &result(PlugAction::On, false)).unwrap();
        assert_eq!(
            first.notification.map(|n| n.kind),
            Some(NotificationKind::HeaterError)
        );
        assert!(!runtime.heater_on);
        assert!(!runtime.heater_pending);
        assert!(runtime.heater_error);

        pending(&mut runtime, PlugAction::On, 60_000);
        let second = apply_result(&mut runtime, &result(PlugAction::On, false)).unwrap();
        assert_eq!(second.notification, None);

        apply_result(&mut runtime, &result(PlugAction::On, true)).unwrap();
        assert!(!runtime.heater_error);
        assert!(!runtime.heater_error_notified);

        let next_streak = apply_result(&mut runtime, &result(PlugAction::Off, false)).unwrap();
        assert!(next_streak.notification.is_some());
    }

    #[test]
    fn muted_device_errors_still_latch() {
        let mut runtime = runtime_with_endpoints();
        runtime.notify_device_errors = false;

        let report = apply_result(&mut runtime, &result(PlugAction::On, false)).unwrap();

        assert_eq!(report.notification, None);
        assert!(runtime.heater_error_notified);
    }

    #[test]
    fn stale_result_leaves_newer_command_pending() {
        let mut runtime = runtime_with_endpoints();
        pending(&mut runtime, PlugAction::Off, 5_000);

        let report = apply_result(&mut runtime, &result(PlugAction::On, true)).unwrap();

        assert!(report.stale);
        assert!(runtime.heater_on);
        assert!(runtime.heater_pending);
        assert_eq!(runtime.heater_pending_action, Some(PlugAction::Off));
    }

    #[test]
    fn unknown_endpoint_is_ignored() {
        let mut runtime = runtime_with_endpoints();
        let mut foreign = result(PlugAction::On, true);
        foreign.endpoint = "garage-plug".to_string();

        assert_eq!(apply_result(&mut runtime, &foreign), None);
        assert!(!runtime.heater_on);
    }

    #[test]
    fn pending_off_times_out_to_off() {
        let mut runtime = runtime_with_endpoints();
        runtime.heater_on = true;
        pending(&mut runtime, PlugAction::Off, 1_000);
        let timeout = runtime.controller.pending_timeout_ms;

        assert_eq!(
            recover_stale_pending(&mut runtime, ApplianceRole::Heater, 1_000 + timeout - 1),
            None
        );

        let recovery =
            recover_stale_pending(&mut runtime, ApplianceRole::Heater, 1_000 + timeout + 1);
        assert_eq!(
            recovery,
            Some(PendingRecovery {
                role: ApplianceRole::Heater,
                assumed_action: PlugAction::Off,
                state_changed: true,
            })
        );
        assert!(!runtime.heater_on);
        assert!(!runtime.heater_pending);
    }

    #[test]
    fn late_result_after_timeout_still_wins() {
        let mut runtime = runtime_with_endpoints();
        pending(&mut runtime, PlugAction::On, 0);
        recover_stale_pending(&mut runtime, ApplianceRole::Heater, 60_000);
        assert!(runtime.heater_on);

        apply_result(&mut runtime, &result(PlugAction::Off, true)).unwrap();
        assert!(!runtime.heater_on);
    }
}

use serde_json::Value;

use crate::{
    config::{ApplianceState, ControllerConfig, RuntimeConfig},
    decision::{decide, ControlAction, ControlDecision, DecisionReason, Limits},
    dispatch::{ApplianceDriver, CommandDispatcher, DispatchOutcome},
    reading::{filter_reading, parse_reading},
    reconcile::{reconcile, ReconcileError, ReconcileReport},
    results::{apply_result, record_failure, recover_stale_pending, PendingRecovery, ResultReport},
    settings::{SettingsError, SettingsUpdate},
    types::{
        ApplianceRole, CommandResult, ControlStatus, ControllerStatus, Notification,
        NotificationCategory, NotificationKind, PlugAction,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub role: ApplianceRole,
    pub action: PlugAction,
    pub reason: DecisionReason,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub decision: Option<ControlDecision>,
    pub recoveries: Vec<PendingRecovery>,
    pub dispatches: Vec<DispatchRecord>,
    pub notifications: Vec<Notification>,
    pub status_change: Option<(ControlStatus, ControlStatus)>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointChange {
    pub role: ApplianceRole,
    pub previous: Option<String>,
    pub current: Option<String>,
    pub retired: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub report: ReconcileReport,
    pub endpoint_changes: Vec<EndpointChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsApplied {
    pub changed: bool,
    pub endpoint_changes: Vec<EndpointChange>,
}

#[derive(Debug, Clone)]
pub struct ControlEngine {
    runtime: RuntimeConfig,
    dispatcher: CommandDispatcher,
    last_reading_ms: Option<u64>,
    shut_down: bool,
}

impl ControlEngine {
    pub fn new(mut runtime: RuntimeConfig) -> Self {
        runtime.prepare_for_startup();
        Self {
            runtime,
            dispatcher: CommandDispatcher::new(),
            last_reading_ms: None,
            shut_down: false,
        }
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.runtime.controller
    }

    pub fn update_temperature(&mut self, value: f32, now_ms: u64) -> bool {
        match filter_reading(&self.runtime.controller, value) {
            Some(temp) => {
                self.runtime.current_temp = Some(temp);
                self.last_reading_ms = Some(now_ms);
                true
            }
            None => false,
        }
    }

    pub fn record_sensor_payload(&mut self, payload: &str, now_ms: u64) -> bool {
        match parse_reading(&self.runtime.controller, payload) {
            Some(temp) => self.update_temperature(temp, now_ms),
            None => false,
        }
    }

    pub fn is_sensor_valid(&self, now_ms: u64) -> bool {
        self.last_reading_ms
            .map(|last| now_ms.saturating_sub(last) < self.runtime.controller.sensor_stale_timeout_ms)
            .unwrap_or(false)
    }

    pub fn valid_temperature(&self, now_ms: u64) -> Option<f32> {
        self.runtime
            .current_temp
            .filter(|_| self.is_sensor_valid(now_ms))
    }

    pub fn set_monitor_active(&mut self, active: bool) -> bool {
        if self.shut_down || self.runtime.monitor_active == active {
            return false;
        }
        self.runtime.monitor_active = active;
        true
    }

    pub fn tick(&mut self, now_ms: u64, driver: &dyn ApplianceDriver) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.shut_down {
            return outcome;
        }

        for role in ApplianceRole::ALL {
            if let Some(recovery) = recover_stale_pending(&mut self.runtime, role, now_ms) {
                outcome.dirty = true;
                outcome.recoveries.push(recovery);
            }
        }

        if !self.runtime.monitor_active {
            // Stopping control must not leave anything running.
            for role in ApplianceRole::ALL {
                if self.runtime.appliance(role).is_on_or_turning_on() {
                    self.dispatch(
                        role,
                        PlugAction::Off,
                        DecisionReason::Disabled,
                        driver,
                        now_ms,
                        &mut outcome,
                    );
                }
            }
            self.set_status(ControlStatus::Stopped, &mut outcome);
            return outcome;
        }

        let limits = Limits::validated(self.runtime.low_limit, self.runtime.high_limit);
        let reading = self.valid_temperature(now_ms);
        let decision = match reading {
            Some(temp) => decide(
                temp,
                self.runtime.low_limit,
                self.runtime.high_limit,
                self.runtime.enable_heating,
                self.runtime.enable_cooling,
            ),
            None => ControlDecision::all_off(DecisionReason::InvalidReading),
        };
        outcome.decision = Some(decision);
        let healthy = reading.is_some() && limits.is_complete();

        for role in ApplianceRole::ALL {
            let wanted = decision.for_role(role);
            let before = self.runtime.appliance(role);

            if let Some(action) = wanted.action.plug_action() {
                self.dispatch(role, action, wanted.reason, driver, now_ms, &mut outcome);
            }
            self.observe_blocked(role, wanted.action, &mut outcome);
            self.observe_safety(role, wanted.reason, before, healthy, &mut outcome);
        }

        if let Some(temp) = reading {
            if let Some(kind) = self.runtime.triggers.observe_temperature(temp, limits) {
                outcome.dirty = true;
                self.emit(kind, temperature_message(kind, temp, limits), &mut outcome);
            }
        }

        let status = match reading {
            None => ControlStatus::SensorFault,
            Some(_) if self.runtime.heater_on => ControlStatus::Heating,
            Some(_) if self.runtime.cooler_on => ControlStatus::Cooling,
            Some(_) => ControlStatus::Idle,
        };
        self.set_status(status, &mut outcome);

        outcome
    }

    pub fn apply_result(&mut self, result: &CommandResult) -> Option<ResultReport> {
        if self.shut_down {
            return None;
        }
        apply_result(&mut self.runtime, result)
    }

    pub fn reconcile(
        &mut self,
        snapshot: Value,
        driver: &dyn ApplianceDriver,
    ) -> Result<ReloadOutcome, ReconcileError> {
        let (next, report) = reconcile(snapshot, &self.runtime)?;
        let previous = std::mem::replace(&mut self.runtime, next);
        let endpoint_changes = self.retire_replaced_endpoints(&previous, driver);
        Ok(ReloadOutcome {
            report,
            endpoint_changes,
        })
    }

    pub fn apply_settings(
        &mut self,
        update: &SettingsUpdate,
        driver: &dyn ApplianceDriver,
    ) -> Result<SettingsApplied, SettingsError> {
        let previous = self.runtime.clone();
        let outcome = update.apply(&mut self.runtime)?;
        let endpoint_changes = if outcome.replaced_endpoints.is_empty() {
            Vec::new()
        } else {
            self.retire_replaced_endpoints(&previous, driver)
        };
        Ok(SettingsApplied {
            changed: outcome.changed,
            endpoint_changes,
        })
    }

    /// Final state for the store. Ticks and late results are ignored afterwards,
    /// so nothing can flip an appliance back on before the process exits.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.runtime.prepare_for_shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        let runtime = &self.runtime;
        ControllerStatus {
            current_temp: runtime.current_temp,
            low_limit: runtime.low_limit,
            high_limit: runtime.high_limit,
            enable_heating: runtime.enable_heating,
            enable_cooling: runtime.enable_cooling,
            monitor_active: runtime.monitor_active,
            status: runtime.status.as_str(),
            sensor_valid: self.is_sensor_valid(now_ms),
            heater_endpoint: runtime.endpoint(ApplianceRole::Heater).map(str::to_owned),
            cooler_endpoint: runtime.endpoint(ApplianceRole::Cooler).map(str::to_owned),
            heater_on: runtime.heater_on,
            cooler_on: runtime.cooler_on,
            heater_pending: runtime.heater_pending,
            cooler_pending: runtime.cooler_pending,
            heater_error: runtime.heater_error,
            cooler_error: runtime.cooler_error,
        }
    }

    fn dispatch(
        &mut self,
        role: ApplianceRole,
        action: PlugAction,
        reason: DecisionReason,
        driver: &dyn ApplianceDriver,
        now_ms: u64,
        outcome: &mut TickOutcome,
    ) {
        let before = self.runtime.appliance(role);
        let result = self
            .dispatcher
            .maybe_send(role, action, &mut self.runtime, driver, now_ms);

        if let DispatchOutcome::Rejected(err) = &result {
            if let Some(notification) =
                record_failure(&mut self.runtime, role, action, &err.to_string())
            {
                outcome.notifications.push(notification);
            }
        }
        if self.runtime.appliance(role) != before {
            outcome.dirty = true;
        }

        outcome.dispatches.push(DispatchRecord {
            role,
            action,
            reason,
            outcome: result,
        });
    }

    fn observe_blocked(&mut self, role: ApplianceRole, wanted: ControlAction, outcome: &mut TickOutcome) {
        let state = self.runtime.appliance(role);

        if wanted != ControlAction::On || state.on {
            let latch = self.runtime.triggers.blocked_latch(role);
            if state.blocked_ticks != 0 || !latch.is_armed() {
                latch.arm();
                self.runtime.update_appliance(role, |state| state.blocked_ticks = 0);
                outcome.dirty = true;
            }
            return;
        }
        if state.pending {
            return;
        }

        let ticks = state.blocked_ticks.saturating_add(1);
        self.runtime.update_appliance(role, |state| state.blocked_ticks = ticks);
        outcome.dirty = true;

        if ticks >= self.runtime.controller.blocked_tick_threshold
            && self.runtime.triggers.blocked_latch(role).fire()
        {
            let message = format!(
                "{} has been wanted on for {ticks} checks but no command could be sent to {}",
                role_label(role),
                self.runtime.endpoint(role).unwrap_or("an unconfigured plug"),
            );
            self.emit(NotificationKind::blocked(role), message, outcome);
        }
    }

    fn observe_safety(
        &mut self,
        role: ApplianceRole,
        reason: DecisionReason,
        before: ApplianceState,
        healthy: bool,
        outcome: &mut TickOutcome,
    ) {
        let latch = self.runtime.triggers.safety_off_latch(role);
        if healthy {
            if !latch.is_armed() {
                latch.arm();
                outcome.dirty = true;
            }
            return;
        }

        if reason.is_safety() && before.is_on_or_turning_on() && latch.fire() {
            outcome.dirty = true;
            let message = format!(
                "{} forced off for safety: {}",
                role_label(role),
                reason.as_str()
            );
            self.emit(NotificationKind::safety_off(role), message, outcome);
        }
    }

    fn retire_replaced_endpoints(
        &mut self,
        previous: &RuntimeConfig,
        driver: &dyn ApplianceDriver,
    ) -> Vec<EndpointChange> {
        let mut changes = Vec::new();

        for role in ApplianceRole::ALL {
            let old = previous.endpoint(role).map(str::to_owned);
            let current = self.runtime.endpoint(role).map(str::to_owned);
            if old == current {
                continue;
            }

            let mut retired = false;
            if let Some(old) = &old {
                self.dispatcher.forget(old);
                if previous.appliance(role).is_on_or_turning_on() {
                    retired = driver.send(old, PlugAction::Off).is_ok();
                }
            }

            // The new device's state is unknown; the next tick re-asserts it.
            self.runtime.set_appliance(role, ApplianceState::default());
            changes.push(EndpointChange {
                role,
                previous: old,
                current,
                retired,
            });
        }

        changes
    }

    fn emit(&self, kind: NotificationKind, message: String, outcome: &mut TickOutcome) {
        let enabled = match kind.category() {
            NotificationCategory::Temperature => self.runtime.notify_temperature_alerts,
            NotificationCategory::DeviceError => self.runtime.notify_device_errors,
            NotificationCategory::Safety => self.runtime.notify_safety_events,
        };
        if enabled {
            outcome.notifications.push(Notification::new(kind, message));
        }
    }

    fn set_status(&mut self, status: ControlStatus, outcome: &mut TickOutcome) {
        if self.runtime.status != status {
            outcome.status_change = Some((self.runtime.status, status));
            self.runtime.status = status;
            outcome.dirty = true;
        }
    }
}

fn role_label(role: ApplianceRole) -> &'static str {
    match role {
        ApplianceRole::Heater => "Heating",
        ApplianceRole::Cooler => "Cooling",
    }
}

fn temperature_message(kind: NotificationKind, temp: f32, limits: Limits) -> String {
    let low = limits.low.map_or_else(|| "unset".to_string(), |v| format!("{v:.1}"));
    let high = limits.high.map_or_else(|| "unset".to_string(), |v| format!("{v:.1}"));
    match kind {
        NotificationKind::TempBelowLimit => {
            format!("Temperature {temp:.1} dropped below the low limit of {low}")
        }
        NotificationKind::TempAboveLimit => {
            format!("Temperature {temp:.1} rose above the high limit of {high}")
        }
        _ => format!("Temperature {temp:.1} is back within {low}-{high}"),
    }
}

use serde::{Deserialize, Serialize};

use crate::{
    triggers::TriggerFlags,
    types::{ApplianceRole, ControlStatus, PlugAction},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub control_interval_ms: u64,
    pub pending_timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub verify_resend_ms: u64,
    pub reload_interval_ms: u64,
    pub state_publish_interval_ms: u64,
    pub sensor_stale_timeout_ms: u64,
    pub blocked_tick_threshold: u32,
    pub min_valid_temp: f32,
    pub max_valid_temp: f32,
    pub sensor_fault_values: Vec<f32>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_interval_ms: 60_000,
            pending_timeout_ms: 30_000,
            rate_limit_ms: 10_000,
            verify_resend_ms: 900_000,
            reload_interval_ms: 60_000,
            state_publish_interval_ms: 30_000,
            sensor_stale_timeout_ms: 300_000,
            blocked_tick_threshold: 3,
            min_valid_temp: -40.0,
            max_valid_temp: 150.0,
            // DS18B20 read error and the BLE hydrometer "no data" marker.
            sensor_fault_values: vec![-127.0, 999.0],
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.control_interval_ms = self.control_interval_ms.max(1_000);
        // A lost result must be written off before the next tick wants the opposite command.
        let max_pending = self.control_interval_ms.saturating_sub(1_000).max(1_000);
        self.pending_timeout_ms = self.pending_timeout_ms.clamp(1_000, max_pending);
        self.reload_interval_ms = self.reload_interval_ms.max(self.control_interval_ms);
        self.state_publish_interval_ms = self.state_publish_interval_ms.max(1_000);
        self.sensor_stale_timeout_ms = self.sensor_stale_timeout_ms.max(self.control_interval_ms);
        self.blocked_tick_threshold = self.blocked_tick_threshold.max(1);

        if !self.min_valid_temp.is_finite()
            || !self.max_valid_temp.is_finite()
            || self.min_valid_temp >= self.max_valid_temp
        {
            self.min_valid_temp = defaults.min_valid_temp;
            self.max_valid_temp = defaults.max_valid_temp;
        }
        self.sensor_fault_values.retain(|value| value.is_finite());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplianceState {
    pub on: bool,
    pub pending: bool,
    pub pending_since: Option<u64>,
    pub pending_action: Option<PlugAction>,
    pub error: bool,
    pub error_notified: bool,
    pub blocked_ticks: u32,
}

impl ApplianceState {
    pub fn mark_pending(&mut self, action: PlugAction, now_ms: u64) {
        self.pending = true;
        self.pending_since = Some(now_ms);
        self.pending_action = Some(action);
    }

    pub fn clear_pending(&mut self) {
        self.pending = false;
        self.pending_since = None;
        self.pending_action = None;
    }

    pub fn pending_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.pending_since
            .map(|since| now_ms.saturating_sub(since))
            .filter(|_| self.pending)
    }

    pub fn is_on_or_turning_on(&self) -> bool {
        self.on || (self.pending && self.pending_action == Some(PlugAction::On))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub low_limit: Option<f32>,
    pub high_limit: Option<f32>,
    pub enable_heating: bool,
    pub enable_cooling: bool,
    pub heater_endpoint: Option<String>,
    pub cooler_endpoint: Option<String>,
    pub sensor_id: Option<String>,
    pub notify_temperature_alerts: bool,
    pub notify_device_errors: bool,
    pub notify_safety_events: bool,
    pub controller: ControllerConfig,

    pub monitor_active: bool,
    pub status: ControlStatus,
    pub current_temp: Option<f32>,

    pub heater_on: bool,
    pub heater_pending: bool,
    pub heater_pending_since: Option<u64>,
    pub heater_pending_action: Option<PlugAction>,
    pub heater_error: bool,
    pub heater_error_notified: bool,
    pub heater_blocked_ticks: u32,

    pub cooler_on: bool,
    pub cooler_pending: bool,
    pub cooler_pending_since: Option<u64>,
    pub cooler_pending_action: Option<PlugAction>,
    pub cooler_error: bool,
    pub cooler_error_notified: bool,
    pub cooler_blocked_ticks: u32,

    #[serde(flatten)]
    pub triggers: TriggerFlags,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            low_limit: None,
            high_limit: None,
            enable_heating: false,
            enable_cooling: false,
            heater_endpoint: None,
            cooler_endpoint: None,
            sensor_id: None,
            notify_temperature_alerts: true,
            notify_device_errors: true,
            notify_safety_events: true,
            controller: ControllerConfig::default(),
            monitor_active: false,
            status: ControlStatus::Stopped,
            current_temp: None,
            heater_on: false,
            heater_pending: false,
            heater_pending_since: None,
            heater_pending_action: None,
            heater_error: false,
            heater_error_notified: false,
            heater_blocked_ticks: 0,
            cooler_on: false,
            cooler_pending: false,
            cooler_pending_since: None,
            cooler_pending_action: None,
            cooler_error: false,
            cooler_error_notified: false,
            cooler_blocked_ticks: 0,
            triggers: TriggerFlags::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn appliance(&self, role: ApplianceRole) -> ApplianceState {
        match role {
            ApplianceRole::Heater => ApplianceState {
                on: self.heater_on,
                pending: self.heater_pending,
                pending_since: self.heater_pending_since,
                pending_action: self.heater_pending_action,
                error: self.heater_error,
                error_notified: self.heater_error_notified,
                blocked_ticks: self.heater_blocked_ticks,
            },
            ApplianceRole::Cooler => ApplianceState {
                on: self.cooler_on,
                pending: self.cooler_pending,
                pending_since: self.cooler_pending_since,
                pending_action: self.cooler_pending_action,
                error: self.cooler_error,
                error_notified: self.cooler_error_notified,
                blocked_ticks: self.cooler_blocked_ticks,
            },
        }
    }

    pub fn set_appliance(&mut self, role: ApplianceRole, state: ApplianceState) {
        match role {
            ApplianceRole::Heater => {
                self.heater_on = state.on;
                self.heater_pending = state.pending;
                self.heater_pending_since = state.pending_since;
                self.heater_pending_action = state.pending_action;
                self.heater_error = state.error;
                self.heater_error_notified = state.error_notified;
                self.heater_blocked_ticks = state.blocked_ticks;
            }
            ApplianceRole::Cooler => {
                self.cooler_on = state.on;
                self.cooler_pending = state.pending;
                self.cooler_pending_since = state.pending_since;
                self.cooler_pending_action = state.pending_action;
                self.cooler_error = state.error;
                self.cooler_error_notified = state.error_notified;
                self.cooler_blocked_ticks = state.blocked_ticks;
            }
        }
    }

    pub fn update_appliance<R>(
        &mut self,
        role: ApplianceRole,
        update: impl FnOnce(&mut ApplianceState) -> R,
    ) -> R {
        let mut state = self.appliance(role);
        let result = update(&mut state);
        self.set_appliance(role, state);
        result
    }

    pub fn endpoint(&self, role: ApplianceRole) -> Option<&str> {
        let endpoint = match role {
            ApplianceRole::Heater => self.heater_endpoint.as_deref(),
            ApplianceRole::Cooler => self.cooler_endpoint.as_deref(),
        };
        endpoint.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn role_for_endpoint(&self, endpoint: &str) -> Option<ApplianceRole> {
        ApplianceRole::ALL
            .into_iter()
            .find(|role| self.endpoint(*role) == Some(endpoint.trim()))
    }

    pub fn prepare_for_startup(&mut self) {
        self.monitor_active = false;
        self.status = ControlStatus::Stopped;
        for role in ApplianceRole::ALL {
            self.update_appliance(role, |state| {
                state.clear_pending();
                state.blocked_ticks = 0;
            });
        }
        self.controller.sanitize();
    }

    // A restart must never inherit an "on" it cannot verify.
    pub fn prepare_for_shutdown(&mut self) {
        self.monitor_active = false;
        self.status = ControlStatus::Stopped;
        for role in ApplianceRole::ALL {
            self.update_appliance(role, |state| {
                state.on = false;
                state.clear_pending();
                state.blocked_ticks = 0;
            });
        }
    }
}

use std::collections::HashMap;

use crate::{
    config::RuntimeConfig,
    types::{ApplianceRole, PlugAction},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("command queue for {endpoint} is full")]
    QueueFull { endpoint: String },
    #[error("driver is disconnected: {0}")]
    Disconnected(String),
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
}

/// Outbound side of the smart-plug driver. `send` must return immediately; the
/// outcome arrives later (or never) as a [`crate::CommandResult`].
pub trait ApplianceDriver {
    fn send(&self, endpoint: &str, action: PlugAction) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastCommand {
    action: PlugAction,
    timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    NoEndpoint,
    InFlight,
    Redundant,
    RateLimited,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoEndpoint => "no endpoint configured",
            Self::InFlight => "command already in flight",
            Self::Redundant => "appliance already in requested state",
            Self::RateLimited => "same command sent too recently",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent {
        verification: bool,
        superseded: bool,
    },
    Suppressed(SuppressReason),
    Rejected(DriverError),
}

impl DispatchOutcome {
    pub fn sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

// Tracks the last command per endpoint identity, so heater and cooler plugs
// are rate limited independently even if their roles are swapped.
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    last_commands: HashMap<String, LastCommand>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forget(&mut self, endpoint: &str) {
        self.last_commands.remove(endpoint);
    }

    pub fn maybe_send(
        &mut self,
        role: ApplianceRole,
        action: PlugAction,
        runtime: &mut RuntimeConfig,
        driver: &dyn ApplianceDriver,
        now_ms: u64,
    ) -> DispatchOutcome {
        let Some(endpoint) = runtime.endpoint(role).map(str::to_owned) else {
            return DispatchOutcome::Suppressed(SuppressReason::NoEndpoint);
        };
        let timing = runtime.controller.clone();

        let mut state = runtime.appliance(role);
        let mut superseded = false;
        if state.pending {
            match state.pending_action {
                Some(pending) if pending != action => {
                    // Newer opposite command wins; the stale result is simply not waited for.
                    state.clear_pending();
                    superseded = true;
                }
                _ => {
                    let in_flight = state
                        .pending_age_ms(now_ms)
                        .is_some_and(|age| age < timing.pending_timeout_ms);
                    if in_flight {
                        return DispatchOutcome::Suppressed(SuppressReason::InFlight);
                    }
                    state.clear_pending();
                }
            }
            runtime.set_appliance(role, state);
        }

        let last = self.last_commands.get(&endpoint).copied();
        let since_same_action = last
            .filter(|record| record.action == action)
            .map(|record| now_ms.saturating_sub(record.timestamp_ms));

        let mut verification = false;
        if state.on == action.is_on() {
            // Without a record of the same action the confirmed state was never
            // asserted by this process, so it is worth re-sending.
            let stale = since_same_action.map_or(true, |age| age >= timing.verify_resend_ms);
            if !stale {
                return DispatchOutcome::Suppressed(SuppressReason::Redundant);
            }
            verification = true;
        }

        if since_same_action.is_some_and(|age| age < timing.rate_limit_ms) {
            return DispatchOutcome::Suppressed(SuppressReason::RateLimited);
        }

        state.mark_pending(action, now_ms);
        runtime.set_appliance(role, state);
        self.last_commands.insert(
            endpoint.clone(),
            LastCommand {
                action,
                timestamp_ms: now_ms,
            },
        );

        match driver.send(&endpoint, action) {
            Ok(()) => DispatchOutcome::Sent {
                verification,
                superseded,
            },
            Err(err) => {
                runtime.update_appliance(role, |state| state.clear_pending());
                DispatchOutcome::Rejected(err)
            }
        }
    }
}

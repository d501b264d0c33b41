pub mod config;
pub mod decision;
pub mod dispatch;
pub mod engine;
pub mod reading;
pub mod reconcile;
pub mod results;
pub mod settings;
pub mod topics;
pub mod triggers;
pub mod types;

#[cfg(test)]
mod testutil;

pub use config::{ApplianceState, ControllerConfig, RuntimeConfig};
pub use decision::{decide, ApplianceDecision, ControlAction, ControlDecision, DecisionReason, Limits};
pub use dispatch::{ApplianceDriver, CommandDispatcher, DispatchOutcome, DriverError, SuppressReason};
pub use engine::{
    ControlEngine, DispatchRecord, EndpointChange, ReloadOutcome, SettingsApplied, TickOutcome,
};
pub use reading::{filter_reading, parse_reading};
pub use reconcile::{ReconcileError, ReconcileReport, RUNTIME_OWNED_KEYS};
pub use results::{PendingRecovery, ResultReport};
pub use settings::{validate_identities, SettingsError, SettingsUpdate};
pub use topics::*;
pub use triggers::{Latch, TriggerFlags};
pub use types::{
    ApplianceRole, CommandResult, ControlStatus, ControllerStatus, Notification,
    NotificationCategory, NotificationKind, Notifier, PlugAction,
};

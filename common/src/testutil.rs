use std::cell::{Cell, RefCell};

use crate::{
    config::RuntimeConfig,
    dispatch::{ApplianceDriver, DriverError},
    types::PlugAction,
};

#[derive(Debug, Default)]
pub struct RecordingDriver {
    sent: RefCell<Vec<(String, PlugAction)>>,
    refuse: Cell<bool>,
}

impl RecordingDriver {
    pub fn refusing() -> Self {
        let driver = Self::default();
        driver.refuse.set(true);
        driver
    }

    pub fn sent(&self) -> Vec<(String, PlugAction)> {
        self.sent.borrow().clone()
    }

    pub fn take(&self) -> Vec<(String, PlugAction)> {
        self.sent.borrow_mut().drain(..).collect()
    }
}

impl ApplianceDriver for RecordingDriver {
    fn send(&self, endpoint: &str, action: PlugAction) -> Result<(), DriverError> {
        if self.refuse.get() {
            return Err(DriverError::QueueFull {
                endpoint: endpoint.to_string(),
            });
        }
        self.sent.borrow_mut().push((endpoint.to_string(), action));
        Ok(())
    }
}

pub fn runtime_with_endpoints() -> RuntimeConfig {
    RuntimeConfig {
        low_limit: Some(73.0),
        high_limit: Some(75.0),
        enable_heating: true,
        enable_cooling: true,
        heater_endpoint: Some("heater-plug".to_string()),
        cooler_endpoint: Some("cooler-plug".to_string()),
        ..RuntimeConfig::default()
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlugAction {
    On,
    Off,
}

impl PlugAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplianceRole {
    Heater,
    Cooler,
}

impl ApplianceRole {
    pub const ALL: [Self; 2] = [Self::Heater, Self::Cooler];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::Cooler => "cooler",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    #[default]
    Stopped,
    Idle,
    Heating,
    Cooling,
    SensorFault,
}

impl ControlStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
            Self::SensorFault => "SENSOR_FAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub endpoint: String,
    pub action: PlugAction,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TempBelowLimit,
    TempAboveLimit,
    TempInRange,
    HeatingBlocked,
    CoolingBlocked,
    HeatingSafetyOff,
    CoolingSafetyOff,
    HeaterError,
    CoolerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Temperature,
    DeviceError,
    Safety,
}

impl NotificationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::DeviceError => "device_error",
            Self::Safety => "safety",
        }
    }
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TempBelowLimit => "temp_below_limit",
            Self::TempAboveLimit => "temp_above_limit",
            Self::TempInRange => "temp_in_range",
            Self::HeatingBlocked => "heating_blocked",
            Self::CoolingBlocked => "cooling_blocked",
            Self::HeatingSafetyOff => "heating_safety_off",
            Self::CoolingSafetyOff => "cooling_safety_off",
            Self::HeaterError => "heater_error",
            Self::CoolerError => "cooler_error",
        }
    }

    pub fn category(self) -> NotificationCategory {
        match self {
            Self::TempBelowLimit | Self::TempAboveLimit | Self::TempInRange => {
                NotificationCategory::Temperature
            }
            Self::HeaterError | Self::CoolerError => NotificationCategory::DeviceError,
            Self::HeatingBlocked
            | Self::CoolingBlocked
            | Self::HeatingSafetyOff
            | Self::CoolingSafetyOff => NotificationCategory::Safety,
        }
    }

    pub fn device_error(role: ApplianceRole) -> Self {
        match role {
            ApplianceRole::Heater => Self::HeaterError,
            ApplianceRole::Cooler => Self::CoolerError,
        }
    }

    pub fn blocked(role: ApplianceRole) -> Self {
        match role {
            ApplianceRole::Heater => Self::HeatingBlocked,
            ApplianceRole::Cooler => Self::CoolingBlocked,
        }
    }

    pub fn safety_off(role: ApplianceRole) -> Self {
        match role {
            ApplianceRole::Heater => Self::HeatingSafetyOff,
            ApplianceRole::Cooler => Self::CoolingSafetyOff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub trait Notifier {
    fn notify(&self, notification: &Notification);
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "lowLimit")]
    pub low_limit: Option<f32>,
    #[serde(rename = "highLimit")]
    pub high_limit: Option<f32>,
    #[serde(rename = "enableHeating")]
    pub enable_heating: bool,
    #[serde(rename = "enableCooling")]
    pub enable_cooling: bool,
    #[serde(rename = "monitorActive")]
    pub monitor_active: bool,
    pub status: &'static str,
    #[serde(rename = "sensorValid")]
    pub sensor_valid: bool,
    #[serde(rename = "heaterEndpoint")]
    pub heater_endpoint: Option<String>,
    #[serde(rename = "coolerEndpoint")]
    pub cooler_endpoint: Option<String>,
    #[serde(rename = "heaterOn")]
    pub heater_on: bool,
    #[serde(rename = "coolerOn")]
    pub cooler_on: bool,
    #[serde(rename = "heaterPending")]
    pub heater_pending: bool,
    #[serde(rename = "coolerPending")]
    pub cooler_pending: bool,
    #[serde(rename = "heaterError")]
    pub heater_error: bool,
    #[serde(rename = "coolerError")]
    pub cooler_error: bool,
}

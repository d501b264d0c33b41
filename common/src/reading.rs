use crate::config::ControllerConfig;

const FAULT_TOLERANCE: f32 = 0.01;

pub fn filter_reading(config: &ControllerConfig, value: f32) -> Option<f32> {
    if !value.is_finite() {
        return None;
    }
    if !(config.min_valid_temp..=config.max_valid_temp).contains(&value) {
        return None;
    }
    if config
        .sensor_fault_values
        .iter()
        .any(|fault| (value - fault).abs() < FAULT_TOLERANCE)
    {
        return None;
    }
    Some(value)
}

pub fn parse_reading(config: &ControllerConfig, payload: &str) -> Option<f32> {
    payload
        .trim()
        .parse::<f32>()
        .ok()
        .and_then(|value| filter_reading(config, value))
}

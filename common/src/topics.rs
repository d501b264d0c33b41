pub const TOPIC_SENSOR_TEMP: &str = "fermctl/sensor/temperature";
pub const TOPIC_SENSOR_TEMP_FILTER: &str = "fermctl/sensor/+/temperature";

pub const TOPIC_CONTROLLER_STATE: &str = "fermctl/controller/state";
pub const TOPIC_NOTIFY: &str = "fermctl/notify";

pub const TOPIC_PLUG_RESULT_FILTER: &str = "fermctl/plug/+/result";

const PLUG_PREFIX: &str = "fermctl/plug/";

pub fn plug_command_topic(endpoint: &str) -> String {
    format!("{PLUG_PREFIX}{endpoint}/cmnd")
}

pub fn plug_result_topic(endpoint: &str) -> String {
    format!("{PLUG_PREFIX}{endpoint}/result")
}

pub fn sensor_temp_topic(sensor_id: Option<&str>) -> String {
    match sensor_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("fermctl/sensor/{id}/temperature"),
        None => TOPIC_SENSOR_TEMP.to_string(),
    }
}

pub fn endpoint_from_topic<'a>(topic: &'a str, suffix: &str) -> Option<&'a str> {
    topic
        .strip_prefix(PLUG_PREFIX)?
        .strip_suffix(suffix)?
        .strip_suffix('/')
        .filter(|endpoint| !endpoint.is_empty() && !endpoint.contains('/'))
}

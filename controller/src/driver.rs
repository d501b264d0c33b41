use rumqttc::{AsyncClient, ClientError, QoS};

use fermctl_common::{plug_command_topic, ApplianceDriver, DriverError, PlugAction};

#[derive(Clone)]
pub struct MqttPlugDriver {
    mqtt: AsyncClient,
}

impl MqttPlugDriver {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self { mqtt }
    }
}

impl ApplianceDriver for MqttPlugDriver {
    fn send(&self, endpoint: &str, action: PlugAction) -> Result<(), DriverError> {
        if endpoint.is_empty() || endpoint.contains(['/', '+', '#']) {
            return Err(DriverError::InvalidEndpoint(endpoint.to_string()));
        }

        self.mqtt
            .try_publish(plug_command_topic(endpoint), QoS::AtLeastOnce, false, action.as_str())
            .map_err(|err| match err {
                ClientError::TryRequest(_) => DriverError::QueueFull {
                    endpoint: endpoint.to_string(),
                },
                other => DriverError::Disconnected(other.to_string()),
            })
    }
}

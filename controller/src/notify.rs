use rumqttc::{AsyncClient, QoS};
use tracing::{info, warn};

use fermctl_common::{Notification, Notifier, TOPIC_NOTIFY};

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            kind = notification.kind.as_str(),
            category = notification.kind.category().as_str(),
            "notification: {}",
            notification.message
        );
    }
}

pub struct MqttNotifier {
    mqtt: AsyncClient,
}

impl MqttNotifier {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self { mqtt }
    }
}

impl Notifier for MqttNotifier {
    fn notify(&self, notification: &Notification) {
        let body = match serde_json::to_vec(notification) {
            Ok(body) => body,
            Err(err) => {
                warn!("notification serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = self.mqtt.try_publish(TOPIC_NOTIFY, QoS::AtLeastOnce, false, body) {
            warn!(
                kind = notification.kind.as_str(),
                "notification publish failed: {err}"
            );
        }
    }
}

pub struct Notifiers(Vec<Box<dyn Notifier + Send + Sync>>);

impl Notifiers {
    pub fn new(sinks: Vec<Box<dyn Notifier + Send + Sync>>) -> Self {
        Self(sinks)
    }

    pub fn notify_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.notify(notification);
        }
    }
}

impl Notifier for Notifiers {
    fn notify(&self, notification: &Notification) {
        for sink in &self.0 {
            sink.notify(notification);
        }
    }
}

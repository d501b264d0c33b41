use std::{sync::Arc, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fermctl_common::{endpoint_from_topic, plug_command_topic, plug_result_topic, sensor_temp_topic};

use crate::bench::{Bench, BenchConfig, PlugReply};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = env_parse("MQTT_PORT").unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("fermctl-simulator", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let bench = Bench::new(bench_config_from_env());
    let sensor_topic = sensor_temp_topic(std::env::var("SIM_SENSOR_ID").ok().as_deref());
    let interval_secs = env_parse::<u64>("SIM_INTERVAL_SECS").unwrap_or(10).max(1);

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    for endpoint in bench.endpoints() {
        mqtt.subscribe(plug_command_topic(endpoint), QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to plug {endpoint}"))?;
    }

    let bench = Arc::new(Mutex::new(bench));
    let plug_bench = bench.clone();
    let plug_client = mqtt.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let Some(endpoint) = endpoint_from_topic(&message.topic, "cmnd") else {
                        continue;
                    };
                    let payload = String::from_utf8_lossy(&message.payload);
                    let reply = plug_bench.lock().await.handle_command(endpoint, &payload);
                    respond(&plug_client, endpoint, reply);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("simulator mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!("bench simulator publishing to {sensor_topic} every {interval_secs}s");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;

        let temperature = bench.lock().await.step();
        mqtt.publish(
            sensor_topic.as_str(),
            QoS::AtLeastOnce,
            false,
            format!("{temperature:.2}"),
        )
        .await
        .context("failed to publish simulated temperature")?;
        debug!("published {temperature:.2}");
    }
}

// Runs on the event loop task, so it must not await the request queue.
fn respond(mqtt: &AsyncClient, endpoint: &str, reply: Option<PlugReply>) {
    match reply {
        Some(PlugReply::Publish(result)) => {
            info!(
                endpoint,
                action = result.action.as_str(),
                success = result.success,
                "plug switched"
            );
            match serde_json::to_vec(&result) {
                Ok(body) => {
                    if let Err(err) =
                        mqtt.try_publish(plug_result_topic(endpoint), QoS::AtLeastOnce, false, body)
                    {
                        warn!("result publish failed: {err}");
                    }
                }
                Err(err) => warn!("result serialization failed: {err}"),
            }
        }
        Some(PlugReply::Drop) => info!(endpoint, "plug switched; result dropped"),
        None => warn!(endpoint, "ignored unrecognised plug command"),
    }
}

fn bench_config_from_env() -> BenchConfig {
    let defaults = BenchConfig::default();
    let ambient = env_parse("SIM_AMBIENT").unwrap_or(defaults.ambient);
    BenchConfig {
        ambient,
        start_temp: env_parse("SIM_START_TEMP").unwrap_or(ambient),
        heater_endpoint: std::env::var("SIM_HEATER_ENDPOINT").unwrap_or(defaults.heater_endpoint),
        cooler_endpoint: std::env::var("SIM_COOLER_ENDPOINT").unwrap_or(defaults.cooler_endpoint),
        drop_every: env_parse("SIM_DROP_EVERY"),
        fail_every: env_parse("SIM_FAIL_EVERY"),
        ..defaults
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

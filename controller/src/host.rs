use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use fermctl_common::{
    endpoint_from_topic, sensor_temp_topic, ApplianceDriver, CommandResult, ControlEngine,
    DispatchOutcome, EndpointChange, Notifier, ReloadOutcome, RuntimeConfig, SettingsApplied,
    SettingsError, SettingsUpdate, TickOutcome, TOPIC_CONTROLLER_STATE, TOPIC_PLUG_RESULT_FILTER,
    TOPIC_SENSOR_TEMP, TOPIC_SENSOR_TEMP_FILTER,
};

use crate::{
    driver::MqttPlugDriver,
    notify::{LogNotifier, MqttNotifier, Notifiers},
    store::AppStore,
};

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<ControlEngine>>,
    driver: MqttPlugDriver,
    notifiers: Arc<Notifiers>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
enum SettingsFailure {
    Invalid(SettingsError),
    Persist(anyhow::Error),
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const RESULT_CHANNEL_CAPACITY: usize = 32;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let engine = start_engine(&store).await;
    let timing = engine.config().clone();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("fermctl-controller", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let sinks: Vec<Box<dyn Notifier + Send + Sync>> = vec![
        Box::new(LogNotifier),
        Box::new(MqttNotifier::new(mqtt.clone())),
    ];
    let notifiers = Notifiers::new(sinks);

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        driver: MqttPlugDriver::new(mqtt.clone()),
        notifiers: Arc::new(notifiers),
        mqtt,
        store,
    };

    let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

    subscribe_topics(&app_state.mqtt).await?;
    let tasks = vec![
        spawn_mqtt_loop(app_state.clone(), eventloop, result_tx),
        spawn_result_listener(app_state.clone(), result_rx),
        spawn_control_loop(
            app_state.clone(),
            Duration::from_millis(timing.control_interval_ms),
        ),
        spawn_reload_loop(
            app_state.clone(),
            Duration::from_millis(timing.reload_interval_ms),
        ),
        spawn_state_publish_loop(
            app_state.clone(),
            Duration::from_millis(timing.state_publish_interval_ms),
        ),
    ];

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/settings", post(handle_post_settings))
        .route("/api/monitor", post(handle_set_monitor))
        .with_state(app_state.clone());

    let port = std::env::var("FERMCTL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let runtime = {
        let mut engine = app_state.engine.lock().await;
        engine.shutdown();
        engine.runtime().clone()
    };
    // No background writer may outlive the final save.
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        if let Err(err) = task.await {
            if err.is_panic() {
                warn!("background task panicked: {err}");
            }
        }
    }
    app_state
        .store
        .save_runtime_state(&runtime)
        .await
        .context("failed to persist shutdown state")?;
    info!("controller stopped");
    Ok(())
}

async fn start_engine(store: &AppStore) -> ControlEngine {
    match store.load_runtime_config().await {
        Ok(runtime) => {
            let engine = ControlEngine::new(runtime);
            if let Err(err) = store.save_runtime_state(engine.runtime()).await {
                warn!("failed to persist startup state: {err:#}");
            }
            engine
        }
        Err(err) => {
            warn!("failed to load runtime config, running on defaults until it is fixed: {err:#}");
            ControlEngine::new(RuntimeConfig::default())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_SENSOR_TEMP_FILTER,
        TOPIC_PLUG_RESULT_FILTER,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(
    app_state: AppState,
    mut eventloop: rumqttc::EventLoop,
    results: mpsc::Sender<CommandResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = handle_mqtt_message(
                        &app_state,
                        &results,
                        message.topic,
                        message.payload.to_vec(),
                    )
                    .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

fn spawn_result_listener(
    app_state: AppState,
    mut results: mpsc::Receiver<CommandResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            let applied = {
                let mut engine = app_state.engine.lock().await;
                engine
                    .apply_result(&result)
                    .map(|report| (report, engine.runtime().clone()))
            };

            let Some((report, runtime)) = applied else {
                debug!(endpoint = %result.endpoint, "result ignored");
                continue;
            };

            if report.success {
                info!(
                    role = report.role.as_str(),
                    action = result.action.as_str(),
                    changed = report.state_changed,
                    stale = report.stale,
                    "plug confirmed"
                );
            } else {
                warn!(
                    role = report.role.as_str(),
                    action = result.action.as_str(),
                    "plug reported failure: {}",
                    result.error.as_deref().unwrap_or("no detail")
                );
            }
            if let Some(notification) = &report.notification {
                app_state.notifiers.notify_all(std::slice::from_ref(notification));
            }

            persist_runtime_state(&app_state, &runtime).await;
        }
        warn!("result channel closed");
    })
}

fn spawn_control_loop(app_state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now_ms = now_ms();

            let (outcome, snapshot) = {
                let mut engine = app_state.engine.lock().await;
                let outcome = engine.tick(now_ms, &app_state.driver);
                let snapshot = outcome.dirty.then(|| engine.runtime().clone());
                (outcome, snapshot)
            };

            log_tick(&outcome);
            app_state.notifiers.notify_all(&outcome.notifications);
            if let Some(runtime) = snapshot {
                persist_runtime_state(&app_state, &runtime).await;
            }
        }
    })
}

fn spawn_reload_loop(app_state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already read the file.
        interval.tick().await;

        loop {
            interval.tick().await;

            let reloaded =
                reload_from_store(&app_state.engine, &app_state.store, &app_state.driver).await;
            let (outcome, runtime) = match reloaded {
                Ok(Some(reloaded)) => reloaded,
                Ok(None) => continue,
                Err(err) => {
                    warn!("config reload skipped: {err:#}");
                    continue;
                }
            };

            let report = &outcome.report;
            if !report.ignored_keys.is_empty() {
                debug!(keys = ?report.ignored_keys, "ignored runtime-owned keys on disk");
            }
            if !report.preserved_keys.is_empty() {
                info!(keys = ?report.preserved_keys, "kept runtime limits over null on disk");
            }
            if report.changed() {
                info!(keys = ?report.changed_keys, "config reloaded from disk");
                if report.changed_keys.iter().any(|key| key == "controller") {
                    info!("controller timing changes take effect after restart");
                }
            }
            log_endpoint_changes(&outcome.endpoint_changes);

            if !outcome.endpoint_changes.is_empty() {
                persist_runtime_state(&app_state, &runtime).await;
            }
        }
    })
}

// Reads the file under the engine lock, so a settings edit that is still being
// written cannot be undone by the snapshot taken before it.
async fn reload_from_store<D: ApplianceDriver>(
    engine: &Mutex<ControlEngine>,
    store: &AppStore,
    driver: &D,
) -> anyhow::Result<Option<(ReloadOutcome, RuntimeConfig)>> {
    let mut engine = engine.lock().await;
    let Some(snapshot) = store.load_snapshot().await? else {
        return Ok(None);
    };
    let outcome = engine
        .reconcile(snapshot, driver)
        .context("config reload rejected")?;
    Ok(Some((outcome, engine.runtime().clone())))
}

fn spawn_state_publish_loop(app_state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;

            let now_ms = now_ms();
            let payload = {
                let engine = app_state.engine.lock().await;
                serde_json::to_vec(&engine.status(now_ms))
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    })
}

async fn handle_mqtt_message(
    app_state: &AppState,
    results: &mpsc::Sender<CommandResult>,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    if let Some(endpoint) = endpoint_from_topic(&topic, "result") {
        let result: CommandResult =
            serde_json::from_slice(&payload).context("invalid command result payload")?;
        if result.endpoint != endpoint {
            warn!(
                "result on {topic} names endpoint {}; dropped",
                result.endpoint
            );
            return Ok(());
        }
        if let Err(err) = results.try_send(result) {
            warn!("result listener is behind, dropping result: {err}");
        }
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let now_ms = now_ms();

    let mut engine = app_state.engine.lock().await;
    let expected = sensor_temp_topic(engine.runtime().sensor_id.as_deref());
    if topic != expected {
        debug!("ignoring reading on {topic}; listening on {expected}");
        return Ok(());
    }
    if !engine.record_sensor_payload(&message, now_ms) {
        warn!("rejected sensor reading {message:?} on {topic}");
    }
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = {
        let engine = state.engine.lock().await;
        engine.status(now_ms())
    };

    Json(status)
}

async fn handle_post_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    match apply_settings_and_save(&state.engine, &state.store, &state.driver, &update).await {
        Ok(applied) => {
            log_endpoint_changes(&applied.endpoint_changes);
            if applied.changed {
                info!("settings updated");
            }
        }
        Err(SettingsFailure::Invalid(err)) => {
            return error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(SettingsFailure::Persist(err)) => {
            warn!("failed to persist settings update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist runtime settings",
            );
        }
    }

    handle_get_status(State(state)).await.into_response()
}

// The engine lock stays held until the file is written; reloads read it under
// the same lock.
async fn apply_settings_and_save<D: ApplianceDriver>(
    engine: &Mutex<ControlEngine>,
    store: &AppStore,
    driver: &D,
    update: &SettingsUpdate,
) -> Result<SettingsApplied, SettingsFailure> {
    let mut engine = engine.lock().await;
    let applied = engine
        .apply_settings(update, driver)
        .map_err(SettingsFailure::Invalid)?;
    if applied.changed {
        store
            .save_runtime_config(engine.runtime())
            .await
            .map_err(SettingsFailure::Persist)?;
    }
    Ok(applied)
}

async fn handle_set_monitor(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let active = match value.to_ascii_lowercase().as_str() {
        "on" => true,
        "off" => false,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'"),
    };

    let changed = {
        let mut engine = state.engine.lock().await;
        engine
            .set_monitor_active(active)
            .then(|| engine.runtime().clone())
    };

    if let Some(runtime) = changed {
        info!(active, "monitor toggled");
        if let Err(err) = state.store.save_runtime_state(&runtime).await {
            warn!("failed to persist monitor update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist runtime state",
            );
        }
    }

    handle_get_status(State(state)).await.into_response()
}

fn log_tick(outcome: &TickOutcome) {
    for recovery in &outcome.recoveries {
        warn!(
            role = recovery.role.as_str(),
            assumed = recovery.assumed_action.as_str(),
            changed = recovery.state_changed,
            "no result within pending timeout; assuming the command succeeded"
        );
    }

    for record in &outcome.dispatches {
        let role = record.role.as_str();
        let action = record.action.as_str();
        match &record.outcome {
            DispatchOutcome::Sent {
                verification,
                superseded,
            } => info!(
                role,
                action,
                reason = record.reason.as_str(),
                verification,
                superseded,
                "plug command sent"
            ),
            DispatchOutcome::Suppressed(reason) => {
                debug!(role, action, "plug command suppressed: {}", reason.as_str())
            }
            DispatchOutcome::Rejected(err) => {
                warn!(role, action, "plug command rejected: {err}")
            }
        }
    }

    if let Some((from, to)) = outcome.status_change {
        info!("status {} -> {}", from.as_str(), to.as_str());
    }
}

fn log_endpoint_changes(changes: &[EndpointChange]) {
    for change in changes {
        info!(
            role = change.role.as_str(),
            previous = change.previous.as_deref().unwrap_or("-"),
            current = change.current.as_deref().unwrap_or("-"),
            retired = change.retired,
            "plug endpoint replaced"
        );
    }
}

async fn persist_runtime_state(state: &AppState, runtime: &RuntimeConfig) {
    if let Err(err) = state.store.save_runtime_state(runtime).await {
        warn!("failed to persist runtime state: {err:#}");
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

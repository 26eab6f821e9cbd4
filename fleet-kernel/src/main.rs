/**
 * FLEET KERNEL - entry point
 *
 * ROLE : wires config, engine, MQTT binding, persistence and HTTP API.
 *
 * FLOW : node metrics (MQTT) -> engine -> task assignment (MQTT) + CSV row.
 * Without a broker section the kernel still serves the API and logs the
 * assignments it would have sent.
 */

use anyhow::{Context, Result};
use fleet_kernel::config::load_config;
use fleet_kernel::engine::Engine;
use fleet_kernel::health::HealthTracker;
use fleet_kernel::http::{self, AppState};
use fleet_kernel::logging;
use fleet_kernel::mqtt::{self, MqttDispatcher};
use fleet_kernel::ports::{CsvSink, Dispatcher, LogDispatcher};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    logging::init();

    let cfg = load_config().await;
    cfg.validate().context("invalid kernel configuration")?;

    let health_tracker = HealthTracker::new();

    let broker = cfg.mqtt.as_ref().map(|conf| {
        let (client, eventloop) = mqtt::create_mqtt_client(conf);
        (conf.clone(), client, eventloop)
    });

    let dispatcher: Arc<dyn Dispatcher> = match &broker {
        Some((conf, client, _)) => Arc::new(MqttDispatcher::new(client.clone(), conf.task_topic.as_str())),
        None => {
            info!("no MQTT section, task assignments are only logged");
            health_tracker.mark_mqtt_disabled();
            Arc::new(LogDispatcher)
        }
    };

    let mut engine = Engine::new(cfg.engine_config(), dispatcher);
    if let Some(path) = &cfg.sink.csv_path {
        let sink = CsvSink::open(path.clone())
            .with_context(|| format!("cannot open optimal-node CSV at {}", path.display()))?;
        info!(path = %sink.path().display(), "recording optimal nodes");
        engine = engine.with_sink(Arc::new(sink));
    }
    let engine = Arc::new(engine);

    if let Some((conf, client, eventloop)) = broker {
        info!(host = %conf.host, port = conf.port, "connecting to MQTT broker");
        mqtt::spawn_mqtt_listener(
            engine.clone(),
            client,
            eventloop,
            conf.metrics_topic,
            health_tracker.clone(),
        );
    }

    let app = http::build_router(AppState::new(engine, health_tracker));

    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("cannot bind HTTP listener on {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);
    axum::serve(listener, app).await.context("HTTP server stopped")?;
    Ok(())
}

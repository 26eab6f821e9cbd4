//! Fleet Agent - worker-node side of the balancer
//!
//! - Samples local CPU, memory and load and publishes them as a metric
//!   report on the metrics topic, once per report interval
//! - Listens on the task topic and runs the assignments addressed to it

mod battery;
mod config;
mod metrics;
mod tasks;

use anyhow::{Context, Result};
use config::AgentConfig;
use metrics::MetricsSampler;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct Agent {
    config: AgentConfig,
    mqtt_client: AsyncClient,
    sampler: MetricsSampler,
}

impl Agent {
    fn new(config: AgentConfig) -> (Self, EventLoop) {
        let mut mqtt_options = MqttOptions::new(
            config.client_id(),
            config.mqtt.broker_host.as_str(),
            config.mqtt.broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
        mqtt_options.set_clean_session(true);

        let (mqtt_client, eventloop) = AsyncClient::new(mqtt_options, 10);
        let sampler = MetricsSampler::new(
            config.agent.node_id.as_str(),
            Duration::from_millis(config.report.cpu_sample_ms),
        );

        info!(node_id = %config.agent.node_id, broker = %config.mqtt.broker_host, "agent initialized");
        (
            Agent {
                config,
                mqtt_client,
                sampler,
            },
            eventloop,
        )
    }

    /// Drives the connection: subscribes to the task topic on every ConnAck
    /// and hands matching assignments to the task runner.
    fn spawn_event_loop(&self, mut eventloop: EventLoop) {
        let client = self.mqtt_client.clone();
        let task_topic = self.config.mqtt.task_topic.clone();
        let node_id = self.config.agent.node_id.clone();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("connected to broker");
                        if let Err(e) = client.try_subscribe(task_topic.as_str(), QoS::AtLeastOnce) {
                            warn!(topic = %task_topic, error = ?e, "subscribe failed");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == task_topic => {
                        if let Some(kind) = tasks::accept_assignment(&publish.payload, &node_id) {
                            tasks::execute(kind, node_id.clone());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    /// Publishes one report per interval. Sampling time counts toward the
    /// interval.
    async fn run(&mut self) -> Result<()> {
        let period = Duration::from_secs(self.config.report.report_interval_secs);
        info!(every_secs = period.as_secs(), topic = %self.config.mqtt.metrics_topic, "publishing metrics");

        loop {
            let started = Instant::now();
            if let Err(e) = self.publish_metrics().await {
                error!("failed to publish metrics: {:#}", e);
            }
            let elapsed = started.elapsed();
            tokio::time::sleep(period.saturating_sub(elapsed)).await;
        }
    }

    async fn publish_metrics(&mut self) -> Result<()> {
        let report = self.sampler.sample().await;
        let payload = serde_json::to_vec(&report).context("failed to serialize metric report")?;

        self.mqtt_client
            .publish(self.config.mqtt.metrics_topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .context("failed to publish metric report")?;

        debug!(
            cpu = report.cpu_load(),
            memory = report.memory_usage(),
            load = report.load_avg(),
            "metrics sent"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fleet_kernel::logging::init();

    info!("fleet agent starting");
    let config = AgentConfig::load().await.context("failed to load agent config")?;

    let (mut agent, eventloop) = Agent::new(config);
    agent.spawn_event_loop(eventloop);

    tokio::select! {
        res = agent.run() => res.context("agent execution failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

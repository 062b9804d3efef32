use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::commands::IntentHandler;
use crate::config::Config;
use crate::device::HttpDevice;
use crate::metrics::Metrics;
use crate::mqtt::{parse_intent, MqttClient, INTENT_TOPIC};
use crate::store::{Snapshot, SnapshotStore};
use crate::workflow::Workflow;

/// Intents buffered while the first reference is retrieved
const INTENT_QUEUE: usize = 64;

/// The running bot: MQTT transport in front of the workflow.
pub struct Watcher {
    pub config: Config,
    pub mqtt: MqttClient,
    pub store: Arc<SnapshotStore>,
    pub workflow: Arc<Workflow>,
    pub metrics: Arc<Mutex<Metrics>>,
    handler: IntentHandler,
}

impl Watcher {
    /// Load the snapshot and wire transport, device and workflow together.
    /// Fails when the snapshot lacks what the bot needs to serve anyone.
    pub async fn new(
        config: Config,
    ) -> Result<(Self, rumqttc::EventLoop), Box<dyn std::error::Error>> {
        let store = Arc::new(SnapshotStore::new(&config.snapshot_path));
        let snapshot = store.load().await?;
        check_snapshot(&snapshot, &store)?;

        let (mqtt, eventloop) = MqttClient::new(&config.mqtt, &snapshot.transport_credential);
        let device = HttpDevice::new(&snapshot.device_endpoint, config.device.request_timeout())?;

        let notifier = Arc::new(mqtt.clone());
        let workflow = Arc::new(Workflow::new(
            store.clone(),
            Arc::new(device),
            notifier.clone(),
            config.device.workflow_settings(),
        ));

        let metrics = Arc::new(Mutex::new(Metrics::new()));
        let handler = IntentHandler::new(store.clone(), workflow.clone(), notifier, metrics.clone());

        info!(
            callers = snapshot.callers.len(),
            endpoint = %snapshot.device_endpoint,
            "snapshot loaded"
        );

        let watcher = Self {
            config,
            mqtt,
            store,
            workflow,
            metrics,
            handler,
        };
        Ok((watcher, eventloop))
    }

    /// Send heartbeat with metrics
    pub async fn heartbeat(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = {
            let mut metrics = self.metrics.lock().await;
            metrics.increment_uptime(self.config.heartbeat_secs);
            metrics.update_memory();
            metrics.record_workflow(self.workflow.stats());
            metrics.status()?
        };
        self.mqtt.publish_status(payload).await
    }

    /// Main event loop. Intents are queued for [`IntentHandler::serve`], which
    /// only starts reading them once a reference tree exists.
    pub async fn run(
        self,
        mut eventloop: rumqttc::EventLoop,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (intents, queue) = mpsc::channel(INTENT_QUEUE);
        let mut serving = tokio::spawn(self.handler.clone().serve(queue));
        info!("watcher ready, entering main loop");

        let period = Duration::from_secs(self.config.heartbeat_secs);
        let mut heartbeat_interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                finished = &mut serving => {
                    error!("intent processing stopped");
                    return match finished {
                        Ok(result) => result.map_err(Into::into),
                        Err(e) => Err(e.into()),
                    };
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish)))
                            if publish.topic == INTENT_TOPIC =>
                        {
                            match parse_intent(&publish.payload) {
                                Ok(msg) => match intents.try_send(msg) {
                                    Ok(()) => {}
                                    Err(TrySendError::Full(msg)) => {
                                        warn!(caller = %msg.caller, "intent queue full, dropping intent");
                                    }
                                    Err(TrySendError::Closed(_)) => {}
                                },
                                Err(e) => warn!(topic = %publish.topic, error = %e, "failed to parse intent"),
                            }
                        }
                        Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                            info!("connected to MQTT broker");
                            // Clean sessions lose subscriptions on reconnect.
                            if let Err(e) = self.mqtt.subscribe().await {
                                error!(error = %e, "failed to subscribe");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "MQTT error, reconnecting...");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        _ => {}
                    }
                }
                _ = heartbeat_interval.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(error = %e, "failed to send heartbeat");
                    }
                }
            }
        }
    }
}

/// The bot cannot serve anyone without an allow-list and a device endpoint.
fn check_snapshot(snapshot: &Snapshot, store: &SnapshotStore) -> Result<(), Box<dyn std::error::Error>> {
    let mut missing = Vec::new();
    if snapshot.callers.is_empty() {
        missing.push("callers");
    }
    if snapshot.device_endpoint.trim().is_empty() {
        missing.push("device_endpoint");
    }
    if missing.is_empty() {
        return Ok(());
    }

    error!(
        path = %store.path().display(),
        missing = %missing.join(", "),
        "snapshot is incomplete; fill in the missing fields and restart"
    );
    Err(format!(
        "{} is missing {}",
        store.path().display(),
        missing.join(" and ")
    )
    .into())
}

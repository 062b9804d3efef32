use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::metrics::Metrics;
use crate::mqtt::IntentMessage;
use crate::store::SnapshotStore;
use crate::workflow::{Intent, Reply, Workflow};

/// Where final replies go. The MQTT client is the production sink.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(
        &self,
        caller: &str,
        request_id: &str,
        reply: &Reply,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Transport-side intent handling: allow-list check, parsing, workflow call,
/// reply delivery and metrics. Cheap to clone into a task per intent.
#[derive(Clone)]
pub struct IntentHandler {
    store: Arc<SnapshotStore>,
    workflow: Arc<Workflow>,
    replies: Arc<dyn ReplySink>,
    metrics: Arc<Mutex<Metrics>>,
}

impl IntentHandler {
    pub fn new(
        store: Arc<SnapshotStore>,
        workflow: Arc<Workflow>,
        replies: Arc<dyn ReplySink>,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            store,
            workflow,
            replies,
            metrics,
        }
    }

    /// Make sure a reference exists, then handle queued intents until the
    /// queue closes. Intents that arrive during the first retrieval wait in
    /// the queue; each one is handled on its own task.
    pub async fn serve(self, mut intents: mpsc::Receiver<IntentMessage>) -> Result<()> {
        if self.workflow.bootstrap().await? {
            info!(path = %self.store.path().display(), "first reference settings stored");
        }
        info!("serving intents");

        while let Some(msg) = intents.recv().await {
            let handler = self.clone();
            tokio::spawn(async move { handler.handle(msg).await });
        }
        Ok(())
    }

    /// Handle an incoming intent from an operator front-end
    pub async fn handle(&self, msg: IntentMessage) {
        info!(
            caller = %msg.caller,
            intent = %msg.intent,
            request_id = %msg.request_id,
            "received intent"
        );

        // The allow-list is re-read each time so hand edits take effect live.
        let allowed = match self.store.load().await {
            Ok(snapshot) => snapshot.is_allowed(&msg.caller),
            Err(e) => {
                error!(error = %e, "cannot read allow-list, dropping intent");
                false
            }
        };
        if !allowed {
            warn!(caller = %msg.caller, "intent from caller outside the allow-list dropped");
            self.metrics.lock().await.record_rejected();
            return;
        }

        let reply = match Intent::parse(&msg.intent, msg.payload) {
            Some(intent) => self.workflow.intent(&msg.caller, intent).await,
            None => {
                warn!(intent = %msg.intent, "unparseable intent");
                Some(Intent::rejection(&msg.intent))
            }
        };
        let Some(reply) = reply else {
            return;
        };

        {
            let mut metrics = self.metrics.lock().await;
            if reply.failed {
                metrics.record_failure();
            } else {
                metrics.record_success();
            }
        }

        if let Err(e) = self.replies.deliver(&msg.caller, &msg.request_id, &reply).await {
            warn!(caller = %msg.caller, error = %e, "failed to deliver reply");
        }
    }
}

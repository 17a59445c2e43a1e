//! Client bootstrap: wake the relay host, connect, then run the controller

use super::call_controller::{CallController, ClientNotice, UserIntent};
use crate::config::ClientConfig;
use crate::domain::shared::value_objects::Identifier;
use crate::infrastructure::client::{
    ClientError, ColdStartProber, RelayClient, RelayClientHandle,
};
use crate::infrastructure::media::MediaFactory;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running calling client for one local identifier
pub struct CallClient {
    identifier: Identifier,
    intents: mpsc::Sender<UserIntent>,
    notices: Mutex<mpsc::UnboundedReceiver<ClientNotice>>,
    relay: Arc<Mutex<Option<RelayClientHandle>>>,
    task: JoinHandle<()>,
}

impl CallClient {
    pub fn start(
        config: &ClientConfig,
        identifier: Identifier,
        media: Arc<dyn MediaFactory>,
    ) -> Result<Self, ClientError> {
        let prober = ColdStartProber::new(config.relay_url.clone(), config.wakeup())?;
        let (intent_tx, intent_rx) = mpsc::channel(32);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let relay_slot = Arc::new(Mutex::new(None));

        let url = config.relay_url.clone();
        let policy = config.backoff();
        let settle_delay = config.settle_delay();
        let local = identifier.clone();
        let slot = relay_slot.clone();

        let task = tokio::spawn(async move {
            if prober.applies() {
                let _ = notice_tx.send(ClientNotice::WakingUp(true));
                if !prober.wake().await {
                    // connect anyway; the reconnect loop covers a slow host
                    warn!("Relay at {} did not answer health probes", prober.health_url());
                }
                let _ = notice_tx.send(ClientNotice::WakingUp(false));
            }

            let (handle, relay_events, relay_task) =
                RelayClient::spawn(url, local.clone(), policy);
            *slot.lock().await = Some(handle.clone());

            let controller = CallController::new(
                local,
                media,
                Arc::new(handle.clone()),
                notice_tx,
                settle_delay,
            );
            controller.run(intent_rx, relay_events).await;

            handle.disconnect();
            let _ = relay_task.await;
            info!("Call client stopped");
        });

        Ok(Self {
            identifier,
            intents: intent_tx,
            notices: Mutex::new(notice_rx),
            relay: relay_slot,
            task,
        })
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub async fn start_call(&self, peer: Identifier) -> Result<(), ClientError> {
        self.intents
            .send(UserIntent::StartCall(peer))
            .await
            .map_err(|_| ClientError::Stopped)
    }

    pub async fn end_call(&self) -> Result<(), ClientError> {
        self.intents
            .send(UserIntent::EndCall)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Next UI notice, or None once the client has stopped
    pub async fn next_notice(&self) -> Option<ClientNotice> {
        self.notices.lock().await.recv().await
    }

    /// Tear down the call, cancel reconnects and close the relay socket
    pub async fn shutdown(self) {
        let Self {
            intents,
            relay,
            task,
            ..
        } = self;
        drop(intents);
        if let Some(handle) = relay.lock().await.as_ref() {
            handle.disconnect();
        }
        let _ = task.await;
    }
}

//! Call controller
//!
//! Everything that can affect the call (user intent, relay traffic, media
//! callbacks, timers) is funneled into one task and applied to the
//! `CallSession` one input at a time.
//!
//! Negotiation calls on the media transport never run on that task. Each
//! transport gets a worker that applies operations in order and feeds results
//! back as epoch-tagged inputs, so hanging up works while an offer is pending.

use crate::domain::call::{CallEffect, CallInput, CallSession, CallState, Epoch};
use crate::domain::shared::value_objects::Identifier;
use crate::domain::signaling::{Envelope, Payload};
use crate::infrastructure::client::{RelayEvent, SignalSender};
use crate::infrastructure::media::{
    MediaError, MediaEvent, MediaEventSink, MediaFactory, MediaTransport,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What the local user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIntent {
    StartCall(Identifier),
    EndCall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Connected,
    Registered(Identifier),
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    Failed(String),
}

/// Everything a UI needs to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    CallState(CallState),
    /// Seconds in the current call
    Duration(u64),
    Error(String),
    Relay(RelayStatus),
    WakingUp(bool),
}

/// Negotiation work queued for a transport's worker
#[derive(Debug)]
enum MediaOp {
    CreateOffer { epoch: Epoch },
    AcceptOffer { epoch: Epoch, offer: Payload },
    AcceptAnswer { epoch: Epoch, answer: Payload },
    AddCandidate { candidate: Payload },
}

/// The transport of the current session and the worker driving it
struct ActiveMedia {
    transport: Arc<dyn MediaTransport>,
    ops: mpsc::UnboundedSender<MediaOp>,
    worker: JoinHandle<()>,
}

impl ActiveMedia {
    fn spawn(transport: Arc<dyn MediaTransport>, inputs: mpsc::UnboundedSender<CallInput>) -> Self {
        let (ops, mut queue) = mpsc::unbounded_channel();
        let worker_transport = transport.clone();
        let worker = tokio::spawn(async move {
            while let Some(op) = queue.recv().await {
                if let Some(input) = apply_media_op(worker_transport.as_ref(), op).await {
                    if inputs.send(input).is_err() {
                        break;
                    }
                }
            }
        });
        Self {
            transport,
            ops,
            worker,
        }
    }

    /// Returns false once the worker is gone
    fn submit(&self, op: MediaOp) -> bool {
        self.ops.send(op).is_ok()
    }

    /// Drop pending operations, then release the transport
    async fn close(self) {
        self.worker.abort();
        self.transport.close().await;
    }
}

async fn apply_media_op(transport: &dyn MediaTransport, op: MediaOp) -> Option<CallInput> {
    match op {
        MediaOp::CreateOffer { epoch } => {
            let result = transport
                .create_local_offer()
                .await
                .map_err(|e| e.to_string());
            Some(CallInput::LocalOfferCreated { epoch, result })
        }
        MediaOp::AcceptOffer { epoch, offer } => {
            let result = transport
                .accept_remote_offer_and_create_answer(offer)
                .await
                .map_err(|e| e.to_string());
            Some(CallInput::LocalAnswerCreated { epoch, result })
        }
        MediaOp::AcceptAnswer { epoch, answer } => {
            let result = transport
                .accept_remote_answer(answer)
                .await
                .map_err(|e| e.to_string());
            Some(CallInput::RemoteAnswerApplied { epoch, result })
        }
        MediaOp::AddCandidate { candidate } => {
            if let Err(e) = transport.add_remote_candidate(candidate).await {
                warn!("Error adding ICE candidate: {}", e);
            }
            None
        }
    }
}

pub struct CallController {
    session: CallSession,
    factory: Arc<dyn MediaFactory>,
    media: Option<ActiveMedia>,
    relay: Arc<dyn SignalSender>,
    notices: mpsc::UnboundedSender<ClientNotice>,
    inputs_tx: mpsc::UnboundedSender<CallInput>,
    inputs_rx: mpsc::UnboundedReceiver<CallInput>,
    media_tx: mpsc::UnboundedSender<(Epoch, MediaEvent)>,
    media_rx: mpsc::UnboundedReceiver<(Epoch, MediaEvent)>,
    timer: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
    settle_delay: Duration,
    tick_interval: Duration,
}

impl CallController {
    pub fn new(
        local: Identifier,
        factory: Arc<dyn MediaFactory>,
        relay: Arc<dyn SignalSender>,
        notices: mpsc::UnboundedSender<ClientNotice>,
        settle_delay: Duration,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        Self {
            session: CallSession::new(local),
            factory,
            media: None,
            relay,
            notices,
            inputs_tx,
            inputs_rx,
            media_tx,
            media_rx,
            timer: None,
            settle: None,
            settle_delay,
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    /// Run until the intent channel closes.
    pub async fn run(
        mut self,
        mut intents: mpsc::Receiver<UserIntent>,
        mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    ) {
        let mut relay_open = true;

        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => self.on_intent(intent).await,
                    None => break,
                },
                event = relay_events.recv(), if relay_open => match event {
                    Some(event) => self.on_relay_event(event).await,
                    None => relay_open = false,
                },
                Some((epoch, event)) = self.media_rx.recv() => {
                    self.dispatch(media_input(epoch, event)).await;
                }
                Some(input) = self.inputs_rx.recv() => {
                    self.dispatch(input).await;
                }
            }
        }

        self.shutdown().await;
    }

    pub async fn on_intent(&mut self, intent: UserIntent) {
        match intent {
            UserIntent::StartCall(peer) => {
                if !self.relay.is_ready() {
                    self.notify(ClientNotice::Error("Not connected to server".to_string()));
                    return;
                }
                self.dispatch(CallInput::StartCall { peer }).await;
            }
            UserIntent::EndCall => self.dispatch(CallInput::EndCall).await,
        }
    }

    pub async fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => self.notify(ClientNotice::Relay(RelayStatus::Connected)),
            RelayEvent::Disconnected => {
                self.notify(ClientNotice::Relay(RelayStatus::Disconnected))
            }
            RelayEvent::Reconnecting { attempt, delay } => self.notify(ClientNotice::Relay(
                RelayStatus::Reconnecting { attempt, delay },
            )),
            RelayEvent::Failed(reason) => {
                self.notify(ClientNotice::Relay(RelayStatus::Failed(reason)))
            }
            RelayEvent::Message(envelope) => self.on_envelope(envelope).await,
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        let input = match envelope {
            Envelope::CallOffer { from, offer, .. } => CallInput::RemoteOffer { from, offer },
            Envelope::CallAnswer { from, answer, .. } => CallInput::RemoteAnswer { from, answer },
            Envelope::IceCandidate {
                from, candidate, ..
            } => CallInput::RemoteCandidate { from, candidate },
            Envelope::CallEnd { from, .. } => CallInput::RemoteEnd { from },
            Envelope::Error { message } => CallInput::RelayError { message },
            Envelope::Registered { user_id, .. } => {
                info!("Registered with relay as {}", user_id);
                self.notify(ClientNotice::Relay(RelayStatus::Registered(user_id)));
                return;
            }
            Envelope::Connected { message } => {
                debug!("Relay greeting: {}", message);
                return;
            }
            Envelope::Register { .. } => {
                warn!("Unexpected register envelope from relay");
                return;
            }
        };
        self.dispatch(input).await;
    }

    /// Apply an input and everything it causes, in order
    pub async fn dispatch(&mut self, input: CallInput) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            for effect in self.session.handle(input) {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: CallEffect) -> Option<CallInput> {
        match effect {
            CallEffect::OpenMedia { epoch } => {
                self.close_media().await;
                let sink = MediaEventSink::new(epoch, self.media_tx.clone());
                match self.factory.create(sink) {
                    Ok(transport) => {
                        self.media = Some(ActiveMedia::spawn(
                            Arc::from(transport),
                            self.inputs_tx.clone(),
                        ));
                        None
                    }
                    Err(e) => Some(CallInput::MediaFailed {
                        epoch,
                        reason: e.to_string(),
                    }),
                }
            }

            CallEffect::CreateLocalOffer { epoch } => {
                self.submit_media(MediaOp::CreateOffer { epoch });
                None
            }

            CallEffect::AcceptRemoteOffer { epoch, offer } => {
                self.submit_media(MediaOp::AcceptOffer { epoch, offer });
                None
            }

            CallEffect::AcceptRemoteAnswer { epoch, answer } => {
                if self.submit_media(MediaOp::AcceptAnswer { epoch, answer }) {
                    None
                } else {
                    Some(CallInput::RemoteAnswerApplied {
                        epoch,
                        result: Err(MediaError::NotInitialized.to_string()),
                    })
                }
            }

            CallEffect::AddRemoteCandidate { candidate, .. } => {
                self.submit_media(MediaOp::AddCandidate { candidate });
                None
            }

            CallEffect::CloseMedia => {
                self.close_media().await;
                None
            }

            CallEffect::Send(envelope) => {
                let kind = envelope.kind();
                if let Err(e) = self.relay.send(envelope) {
                    error!("Failed to send {}: {}", kind, e);
                    self.notify(ClientNotice::Error(e.to_string()));
                }
                None
            }

            CallEffect::StartTimer { epoch } => {
                self.stop_timer();
                let inputs = self.inputs_tx.clone();
                let period = self.tick_interval;
                self.timer = Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval_at(
                        tokio::time::Instant::now() + period,
                        period,
                    );
                    loop {
                        ticker.tick().await;
                        if inputs.send(CallInput::Tick { epoch }).is_err() {
                            break;
                        }
                    }
                }));
                None
            }

            CallEffect::StopTimer => {
                self.stop_timer();
                None
            }

            CallEffect::ScheduleSettle { epoch } => {
                if let Some(pending) = self.settle.take() {
                    pending.abort();
                }
                let inputs = self.inputs_tx.clone();
                let delay = self.settle_delay;
                self.settle = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inputs.send(CallInput::SettleElapsed { epoch });
                }));
                None
            }

            CallEffect::StateChanged(state) => {
                info!("Call state: {}", state);
                self.notify(ClientNotice::CallState(state));
                None
            }

            CallEffect::DurationChanged(seconds) => {
                self.notify(ClientNotice::Duration(seconds));
                None
            }

            CallEffect::Failed(message) => {
                self.notify(ClientNotice::Error(message));
                None
            }
        }
    }

    fn submit_media(&self, op: MediaOp) -> bool {
        match self.media.as_ref() {
            Some(media) => media.submit(op),
            None => {
                debug!("No media transport for {:?}", op);
                false
            }
        }
    }

    async fn close_media(&mut self) {
        if let Some(media) = self.media.take() {
            media.close().await;
        }
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    async fn shutdown(&mut self) {
        self.stop_timer();
        if let Some(settle) = self.settle.take() {
            settle.abort();
        }
        self.close_media().await;
        debug!("Call controller stopped");
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notices.send(notice);
    }
}

fn media_input(epoch: Epoch, event: MediaEvent) -> CallInput {
    match event {
        MediaEvent::LocalCandidate(candidate) => CallInput::LocalCandidate { epoch, candidate },
        MediaEvent::Connected => CallInput::MediaConnected { epoch },
        MediaEvent::Ended => CallInput::MediaEnded { epoch },
    }
}

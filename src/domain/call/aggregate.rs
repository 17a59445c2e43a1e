//! Call session aggregate root
//!
//! Drives one call's negotiation: idle -> calling -> connected -> ended -> idle.
//! Every input is a pure transition from the current state to a new state plus
//! a list of effects; the application layer executes the effects and feeds
//! their results back in as further inputs.

use crate::domain::call::event::{CallEffect, CallInput, Epoch};
use crate::domain::call::value_object::{CallDirection, CallState, EndReason};
use crate::domain::shared::value_objects::Identifier;
use crate::domain::signaling::Envelope;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CallSession {
    /// Our own identifier
    local: Identifier,
    state: CallState,
    direction: Option<CallDirection>,
    /// Counterparty for the current session
    peer: Option<Identifier>,
    /// Bumped on every session start
    epoch: Epoch,
    duration_secs: u64,
    timer_running: bool,
}

impl CallSession {
    pub fn new(local: Identifier) -> Self {
        Self {
            local,
            state: CallState::Idle,
            direction: None,
            peer: None,
            epoch: 0,
            duration_secs: 0,
            timer_running: false,
        }
    }

    pub fn local(&self) -> &Identifier {
        &self.local
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn direction(&self) -> Option<CallDirection> {
        self.direction
    }

    pub fn peer(&self) -> Option<&Identifier> {
        self.peer.as_ref()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Apply one input and return the effects to run, in order.
    pub fn handle(&mut self, input: CallInput) -> Vec<CallEffect> {
        match input {
            CallInput::StartCall { peer } => {
                if self.state != CallState::Idle {
                    debug!("Ignoring call request to {} while {}", peer, self.state);
                    return Vec::new();
                }
                let epoch = self.begin(peer, CallDirection::Outgoing);
                vec![
                    CallEffect::StateChanged(CallState::Calling),
                    CallEffect::OpenMedia { epoch },
                    CallEffect::CreateLocalOffer { epoch },
                ]
            }

            CallInput::RemoteOffer { from, offer } => {
                // no call waiting: a second offer never interrupts a session
                if self.state != CallState::Idle {
                    info!("Ignoring call offer from {} while {}", from, self.state);
                    return Vec::new();
                }
                info!("Incoming call from {}", from);
                let epoch = self.begin(from, CallDirection::Incoming);
                vec![
                    CallEffect::StateChanged(CallState::Calling),
                    CallEffect::OpenMedia { epoch },
                    CallEffect::AcceptRemoteOffer { epoch, offer },
                ]
            }

            CallInput::LocalOfferCreated { epoch, result } => {
                if !self.is_current(epoch) || self.state != CallState::Calling {
                    return Vec::new();
                }
                match (result, self.peer.clone()) {
                    (Ok(offer), Some(to)) => vec![CallEffect::Send(Envelope::CallOffer {
                        from: self.local.clone(),
                        to,
                        offer,
                    })],
                    (Err(e), _) => self.fail(format!("Failed to start call: {}", e)),
                    (Ok(_), None) => Vec::new(),
                }
            }

            CallInput::LocalAnswerCreated { epoch, result } => {
                if !self.is_current(epoch) || self.state != CallState::Calling {
                    return Vec::new();
                }
                match (result, self.peer.clone()) {
                    (Ok(answer), Some(to)) => vec![CallEffect::Send(Envelope::CallAnswer {
                        from: self.local.clone(),
                        to,
                        answer,
                    })],
                    (Err(e), _) => self.fail(format!("Call error: {}", e)),
                    (Ok(_), None) => Vec::new(),
                }
            }

            CallInput::RemoteAnswer { from, answer } => {
                if self.state != CallState::Calling
                    || self.direction != Some(CallDirection::Outgoing)
                    || !self.is_peer(&from)
                {
                    debug!("Ignoring call answer from {} while {}", from, self.state);
                    return Vec::new();
                }
                vec![CallEffect::AcceptRemoteAnswer {
                    epoch: self.epoch,
                    answer,
                }]
            }

            CallInput::RemoteAnswerApplied { epoch, result } => {
                if !self.is_current(epoch) || self.state != CallState::Calling {
                    return Vec::new();
                }
                match result {
                    Ok(()) => {
                        self.state = CallState::Connected;
                        vec![CallEffect::StateChanged(CallState::Connected)]
                    }
                    Err(e) => self.fail(format!("Call error: {}", e)),
                }
            }

            CallInput::RemoteCandidate { from, candidate } => {
                if !self.state.is_active() || !self.is_peer(&from) {
                    debug!("Dropping ICE candidate from {} while {}", from, self.state);
                    return Vec::new();
                }
                vec![CallEffect::AddRemoteCandidate {
                    epoch: self.epoch,
                    candidate,
                }]
            }

            CallInput::LocalCandidate { epoch, candidate } => {
                if !self.is_current(epoch) || !self.state.is_active() {
                    return Vec::new();
                }
                match self.peer.clone() {
                    Some(to) => vec![CallEffect::Send(Envelope::IceCandidate {
                        from: self.local.clone(),
                        to,
                        candidate,
                    })],
                    None => Vec::new(),
                }
            }

            CallInput::MediaConnected { epoch } => {
                if !self.is_current(epoch) || !self.state.is_active() {
                    return Vec::new();
                }
                let mut effects = Vec::new();
                if self.state != CallState::Connected {
                    self.state = CallState::Connected;
                    effects.push(CallEffect::StateChanged(CallState::Connected));
                }
                if !self.timer_running {
                    self.timer_running = true;
                    effects.push(CallEffect::StartTimer { epoch });
                }
                effects
            }

            CallInput::Tick { epoch } => {
                if !self.is_current(epoch) || self.state != CallState::Connected {
                    return Vec::new();
                }
                self.duration_secs += 1;
                vec![CallEffect::DurationChanged(self.duration_secs)]
            }

            CallInput::EndCall => {
                if !self.state.is_active() {
                    return Vec::new();
                }
                self.end(EndReason::LocalHangup)
            }

            CallInput::RemoteEnd { from } => {
                if !self.state.is_active() || !self.is_peer(&from) {
                    return Vec::new();
                }
                self.end(EndReason::RemoteHangup)
            }

            CallInput::MediaEnded { epoch } => {
                if !self.is_current(epoch) || !self.state.is_active() {
                    return Vec::new();
                }
                self.end(EndReason::MediaEnded)
            }

            CallInput::MediaFailed { epoch, reason } => {
                if !self.is_current(epoch) || !self.state.is_active() {
                    return Vec::new();
                }
                self.fail(format!("Call error: {}", reason))
            }

            CallInput::RelayError { message } => {
                if self.state == CallState::Calling {
                    self.fail(message)
                } else {
                    vec![CallEffect::Failed(message)]
                }
            }

            CallInput::SettleElapsed { epoch } => {
                if !self.is_current(epoch) || self.state != CallState::Ended {
                    return Vec::new();
                }
                self.reset();
                vec![
                    CallEffect::StateChanged(CallState::Idle),
                    CallEffect::DurationChanged(0),
                ]
            }
        }
    }

    fn begin(&mut self, peer: Identifier, direction: CallDirection) -> Epoch {
        self.epoch += 1;
        self.state = CallState::Calling;
        self.direction = Some(direction);
        self.peer = Some(peer);
        self.duration_secs = 0;
        self.timer_running = false;
        self.epoch
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        epoch == self.epoch
    }

    fn is_peer(&self, who: &Identifier) -> bool {
        self.peer.as_ref() == Some(who)
    }

    fn end(&mut self, reason: EndReason) -> Vec<CallEffect> {
        info!(
            "Call with {:?} ended ({:?}) after {}s",
            self.peer.as_ref().map(Identifier::as_str),
            reason,
            self.duration_secs
        );

        let mut effects = Vec::new();
        if reason == EndReason::LocalHangup {
            if let Some(to) = self.peer.clone() {
                effects.push(CallEffect::Send(Envelope::CallEnd {
                    from: self.local.clone(),
                    to,
                }));
            }
        }
        if self.timer_running {
            self.timer_running = false;
            effects.push(CallEffect::StopTimer);
        }
        effects.push(CallEffect::CloseMedia);

        self.state = CallState::Ended;
        effects.push(CallEffect::StateChanged(CallState::Ended));
        effects.push(CallEffect::ScheduleSettle { epoch: self.epoch });
        effects
    }

    /// Negotiation failure: straight back to idle with a visible error
    fn fail(&mut self, message: String) -> Vec<CallEffect> {
        warn!("Call negotiation failed: {}", message);

        let mut effects = Vec::new();
        if self.timer_running {
            effects.push(CallEffect::StopTimer);
        }
        effects.push(CallEffect::CloseMedia);
        self.reset();
        effects.push(CallEffect::StateChanged(CallState::Idle));
        effects.push(CallEffect::Failed(message));
        effects
    }

    fn reset(&mut self) {
        self.state = CallState::Idle;
        self.direction = None;
        self.peer = None;
        self.duration_secs = 0;
        self.timer_running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    fn outgoing_session() -> CallSession {
        let mut session = CallSession::new(id("alice"));
        session.handle(CallInput::StartCall { peer: id("bob") });
        session
    }

    fn connected_session() -> CallSession {
        let mut session = outgoing_session();
        let epoch = session.epoch();
        session.handle(CallInput::LocalOfferCreated {
            epoch,
            result: Ok(json!({"sdp": "offer"})),
        });
        session.handle(CallInput::RemoteAnswer {
            from: id("bob"),
            answer: json!({"sdp": "answer"}),
        });
        session.handle(CallInput::RemoteAnswerApplied { epoch, result: Ok(()) });
        session.handle(CallInput::MediaConnected { epoch });
        session
    }

    #[test]
    fn test_start_call_requests_offer() {
        let mut session = CallSession::new(id("alice"));
        let effects = session.handle(CallInput::StartCall { peer: id("bob") });

        assert_eq!(session.state(), CallState::Calling);
        assert_eq!(session.direction(), Some(CallDirection::Outgoing));
        assert_eq!(
            effects,
            vec![
                CallEffect::StateChanged(CallState::Calling),
                CallEffect::OpenMedia { epoch: 1 },
                CallEffect::CreateLocalOffer { epoch: 1 },
            ]
        );

        let effects = session.handle(CallInput::LocalOfferCreated {
            epoch: 1,
            result: Ok(json!({"sdp": "v=0"})),
        });
        assert_eq!(
            effects,
            vec![CallEffect::Send(Envelope::CallOffer {
                from: id("alice"),
                to: id("bob"),
                offer: json!({"sdp": "v=0"}),
            })]
        );
    }

    #[test]
    fn test_offer_failure_reverts_to_idle() {
        let mut session = outgoing_session();
        let effects = session.handle(CallInput::LocalOfferCreated {
            epoch: 1,
            result: Err("no microphone".to_string()),
        });

        assert_eq!(session.state(), CallState::Idle);
        assert!(session.peer().is_none());
        assert!(effects.contains(&CallEffect::CloseMedia));
        assert!(effects.contains(&CallEffect::Failed(
            "Failed to start call: no microphone".to_string()
        )));
    }

    #[test]
    fn test_incoming_offer_is_answered() {
        let mut session = CallSession::new(id("bob"));
        let effects = session.handle(CallInput::RemoteOffer {
            from: id("alice"),
            offer: json!({"sdp": "offer"}),
        });
        assert_eq!(session.state(), CallState::Calling);
        assert_eq!(session.direction(), Some(CallDirection::Incoming));
        assert!(effects.contains(&CallEffect::AcceptRemoteOffer {
            epoch: 1,
            offer: json!({"sdp": "offer"}),
        }));

        let effects = session.handle(CallInput::LocalAnswerCreated {
            epoch: 1,
            result: Ok(json!({"sdp": "answer"})),
        });
        assert_eq!(
            effects,
            vec![CallEffect::Send(Envelope::CallAnswer {
                from: id("bob"),
                to: id("alice"),
                answer: json!({"sdp": "answer"}),
            })]
        );
    }

    #[test]
    fn test_answer_failure_reverts_to_idle() {
        let mut session = CallSession::new(id("bob"));
        session.handle(CallInput::RemoteOffer {
            from: id("alice"),
            offer: json!({}),
        });
        let effects = session.handle(CallInput::LocalAnswerCreated {
            epoch: 1,
            result: Err("bad sdp".to_string()),
        });
        assert_eq!(session.state(), CallState::Idle);
        assert!(effects.contains(&CallEffect::Failed("Call error: bad sdp".to_string())));
    }

    #[test]
    fn test_offer_ignored_while_connected() {
        let mut session = connected_session();
        assert_eq!(session.state(), CallState::Connected);

        let effects = session.handle(CallInput::RemoteOffer {
            from: id("carol"),
            offer: json!({}),
        });
        assert!(effects.is_empty());
        assert_eq!(session.state(), CallState::Connected);
        assert_eq!(session.peer(), Some(&id("bob")));
    }

    #[test]
    fn test_glare_both_sides_ignore_offer() {
        let mut session = outgoing_session();
        let effects = session.handle(CallInput::RemoteOffer {
            from: id("bob"),
            offer: json!({}),
        });
        assert!(effects.is_empty());
        assert_eq!(session.state(), CallState::Calling);
    }

    #[test]
    fn test_answer_moves_to_connected() {
        let mut session = outgoing_session();
        let effects = session.handle(CallInput::RemoteAnswer {
            from: id("bob"),
            answer: json!({"sdp": "answer"}),
        });
        assert_eq!(
            effects,
            vec![CallEffect::AcceptRemoteAnswer {
                epoch: 1,
                answer: json!({"sdp": "answer"}),
            }]
        );

        let effects = session.handle(CallInput::RemoteAnswerApplied { epoch: 1, result: Ok(()) });
        assert_eq!(session.state(), CallState::Connected);
        assert_eq!(effects, vec![CallEffect::StateChanged(CallState::Connected)]);
    }

    #[test]
    fn test_answer_from_stranger_ignored() {
        let mut session = outgoing_session();
        let effects = session.handle(CallInput::RemoteAnswer {
            from: id("mallory"),
            answer: json!({}),
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_rejected_answer_reverts_to_idle() {
        let mut session = outgoing_session();
        let effects =
            session.handle(CallInput::RemoteAnswerApplied { epoch: 1, result: Err("bad".into()) });
        assert_eq!(session.state(), CallState::Idle);
        assert!(effects.contains(&CallEffect::CloseMedia));
    }

    #[test]
    fn test_candidates_forwarded_only_with_active_session() {
        let mut session = CallSession::new(id("alice"));
        assert!(session
            .handle(CallInput::RemoteCandidate { from: id("bob"), candidate: json!({}) })
            .is_empty());

        let mut session = outgoing_session();
        let effects =
            session.handle(CallInput::RemoteCandidate { from: id("bob"), candidate: json!({"c": 1}) });
        assert_eq!(
            effects,
            vec![CallEffect::AddRemoteCandidate { epoch: 1, candidate: json!({"c": 1}) }]
        );
        assert_eq!(session.state(), CallState::Calling);

        let effects = session.handle(CallInput::LocalCandidate { epoch: 1, candidate: json!({"c": 2}) });
        assert_eq!(
            effects,
            vec![CallEffect::Send(Envelope::IceCandidate {
                from: id("alice"),
                to: id("bob"),
                candidate: json!({"c": 2}),
            })]
        );
    }

    #[test]
    fn test_media_connected_starts_timer_once() {
        let mut session = outgoing_session();
        let effects = session.handle(CallInput::MediaConnected { epoch: 1 });
        assert_eq!(
            effects,
            vec![
                CallEffect::StateChanged(CallState::Connected),
                CallEffect::StartTimer { epoch: 1 },
            ]
        );
        assert!(session.handle(CallInput::MediaConnected { epoch: 1 }).is_empty());

        session.handle(CallInput::Tick { epoch: 1 });
        let effects = session.handle(CallInput::Tick { epoch: 1 });
        assert_eq!(effects, vec![CallEffect::DurationChanged(2)]);
    }

    #[test]
    fn test_local_hangup_sends_call_end() {
        let mut session = connected_session();
        let effects = session.handle(CallInput::EndCall);
        assert_eq!(
            effects,
            vec![
                CallEffect::Send(Envelope::CallEnd { from: id("alice"), to: id("bob") }),
                CallEffect::StopTimer,
                CallEffect::CloseMedia,
                CallEffect::StateChanged(CallState::Ended),
                CallEffect::ScheduleSettle { epoch: 1 },
            ]
        );
        assert_eq!(session.state(), CallState::Ended);
    }

    #[test]
    fn test_remote_hangup_does_not_echo() {
        let mut session = connected_session();
        let effects = session.handle(CallInput::RemoteEnd { from: id("bob") });
        assert!(!effects.iter().any(|e| matches!(e, CallEffect::Send(_))));
        assert_eq!(session.state(), CallState::Ended);

        let mut session = connected_session();
        let effects = session.handle(CallInput::MediaEnded { epoch: 1 });
        assert!(!effects.iter().any(|e| matches!(e, CallEffect::Send(_))));
        assert_eq!(session.state(), CallState::Ended);
    }

    #[test]
    fn test_settle_returns_to_idle() {
        let mut session = connected_session();
        session.handle(CallInput::Tick { epoch: 1 });
        session.handle(CallInput::EndCall);
        assert_eq!(session.duration_secs(), 1);

        let effects = session.handle(CallInput::SettleElapsed { epoch: 1 });
        assert_eq!(
            effects,
            vec![CallEffect::StateChanged(CallState::Idle), CallEffect::DurationChanged(0)]
        );
        assert_eq!(session.state(), CallState::Idle);
        assert_eq!(session.duration_secs(), 0);
        assert!(session.peer().is_none());
    }

    #[test]
    fn test_stale_epoch_events_are_noops() {
        let mut session = connected_session();
        session.handle(CallInput::EndCall);
        session.handle(CallInput::SettleElapsed { epoch: 1 });
        session.handle(CallInput::StartCall { peer: id("carol") });
        assert_eq!(session.epoch(), 2);

        assert!(session.handle(CallInput::MediaConnected { epoch: 1 }).is_empty());
        assert!(session.handle(CallInput::MediaEnded { epoch: 1 }).is_empty());
        assert!(session
            .handle(CallInput::LocalCandidate { epoch: 1, candidate: json!({}) })
            .is_empty());
        assert!(session.handle(CallInput::SettleElapsed { epoch: 1 }).is_empty());
        assert_eq!(session.state(), CallState::Calling);
    }

    #[test]
    fn test_relay_error_while_calling_reverts() {
        let mut session = outgoing_session();
        let effects = session.handle(CallInput::RelayError {
            message: "User carol not found or offline".to_string(),
        });
        assert_eq!(session.state(), CallState::Idle);
        assert!(effects.contains(&CallEffect::Failed(
            "User carol not found or offline".to_string()
        )));

        let mut idle = CallSession::new(id("alice"));
        let effects = idle.handle(CallInput::RelayError { message: "oops".to_string() });
        assert_eq!(effects, vec![CallEffect::Failed("oops".to_string())]);
    }

    #[test]
    fn test_end_when_idle_is_noop() {
        let mut session = CallSession::new(id("alice"));
        assert!(session.handle(CallInput::EndCall).is_empty());
        assert!(session.handle(CallInput::RemoteEnd { from: id("bob") }).is_empty());
    }
}

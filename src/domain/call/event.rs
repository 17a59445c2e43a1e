//! Inputs consumed and effects produced by the call state machine
//!
//! Media callbacks and async media results are tagged with the session epoch
//! they belong to so late arrivals from a torn-down session can be discarded.

use crate::domain::call::value_object::CallState;
use crate::domain::shared::value_objects::Identifier;
use crate::domain::signaling::{Envelope, Payload};

/// Session generation counter
pub type Epoch = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum CallInput {
    // local user intent
    StartCall { peer: Identifier },
    EndCall,

    // relay traffic
    RemoteOffer { from: Identifier, offer: Payload },
    RemoteAnswer { from: Identifier, answer: Payload },
    RemoteCandidate { from: Identifier, candidate: Payload },
    RemoteEnd { from: Identifier },
    RelayError { message: String },

    // media capability results
    MediaFailed { epoch: Epoch, reason: String },
    LocalOfferCreated { epoch: Epoch, result: Result<Payload, String> },
    LocalAnswerCreated { epoch: Epoch, result: Result<Payload, String> },
    RemoteAnswerApplied { epoch: Epoch, result: Result<(), String> },

    // media capability events
    LocalCandidate { epoch: Epoch, candidate: Payload },
    MediaConnected { epoch: Epoch },
    MediaEnded { epoch: Epoch },

    // timers
    Tick { epoch: Epoch },
    SettleElapsed { epoch: Epoch },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEffect {
    /// Create the media sub-resource for this epoch
    OpenMedia { epoch: Epoch },
    CreateLocalOffer { epoch: Epoch },
    AcceptRemoteOffer { epoch: Epoch, offer: Payload },
    AcceptRemoteAnswer { epoch: Epoch, answer: Payload },
    AddRemoteCandidate { epoch: Epoch, candidate: Payload },
    /// Tear down the media sub-resource, if any
    CloseMedia,
    Send(Envelope),
    StartTimer { epoch: Epoch },
    StopTimer,
    ScheduleSettle { epoch: Epoch },
    StateChanged(CallState),
    DurationChanged(u64),
    /// User-visible, non-fatal error
    Failed(String),
}

// Copyright 2020 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! C4: the verification manager.
//!
//! Holds every in-flight [`SasSession`] keyed by transaction id, dispatches
//! inbound events to the right one, and garbage-collects sessions once
//! they've been terminal for a while. The manager never talks to a
//! transport itself; [`Self::receive`] and [`Self::create_sas`] hand back
//! [`OutgoingEnvelope`]s (also buffered in an internal FIFO) for the caller
//! to actually deliver.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::{
    identities::OlmDevice,
    messages::{AcceptContent, CancelCode, CancelContent, KeyContent, MacContent, OutgoingEnvelope, StartContent},
    sas::{ReceiveOutcome, SasSession},
    time::SESSION_GC_AGE,
};

/// A device directory: resolves `(user_id, device_id)` to the identity keys
/// needed to build or accept a verification. The manager never caches
/// lookups itself; the owning client decides how fresh "unknown device"
/// means.
pub trait DeviceDirectory {
    /// Look up a device, if known.
    fn device(&self, user_id: &str, device_id: &str) -> Option<OlmDevice>;
}

/// One parsed `m.key.verification.*` to-device event, with its envelope
/// metadata attached. `raw_start_json` on [`InboundEvent::Start`] must be
/// the exact bytes the `start` content arrived as (see
/// [`crate::crypto::calculate_commitment`]).
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// `m.key.verification.start`.
    Start { sender_user_id: String, sender_device_id: String, transaction_id: String, content: StartContent, raw_json: String },
    /// `m.key.verification.accept`.
    Accept { sender_user_id: String, transaction_id: String, content: AcceptContent },
    /// `m.key.verification.key`.
    Key { sender_user_id: String, transaction_id: String, content: KeyContent },
    /// `m.key.verification.mac`.
    Mac { sender_user_id: String, transaction_id: String, content: MacContent },
    /// `m.key.verification.cancel`.
    Cancel { sender_user_id: String, transaction_id: String, content: CancelContent },
}

impl InboundEvent {
    fn transaction_id(&self) -> &str {
        match self {
            InboundEvent::Start { transaction_id, .. }
            | InboundEvent::Accept { transaction_id, .. }
            | InboundEvent::Key { transaction_id, .. }
            | InboundEvent::Mac { transaction_id, .. }
            | InboundEvent::Cancel { transaction_id, .. } => transaction_id,
        }
    }

    fn sender_user_id(&self) -> &str {
        match self {
            InboundEvent::Start { sender_user_id, .. }
            | InboundEvent::Accept { sender_user_id, .. }
            | InboundEvent::Key { sender_user_id, .. }
            | InboundEvent::Mac { sender_user_id, .. }
            | InboundEvent::Cancel { sender_user_id, .. } => sender_user_id,
        }
    }
}

/// Holds every session this device knows about and dispatches events to
/// them.
#[derive(Debug)]
pub struct VerificationManager {
    own_device: OlmDevice,
    sessions: DashMap<String, SasSession>,
    outgoing: Mutex<VecDeque<OutgoingEnvelope>>,
    /// Users referenced by a `start` for a device we don't know about yet;
    /// the owning client is expected to drain this and refresh its device
    /// directory for each entry.
    users_for_key_query: Mutex<HashSet<String>>,
}

impl VerificationManager {
    /// Create a manager for the local account `own_device`.
    pub fn new(own_device: OlmDevice) -> Self {
        Self {
            own_device,
            sessions: DashMap::new(),
            outgoing: Mutex::new(VecDeque::new()),
            users_for_key_query: Mutex::new(HashSet::new()),
        }
    }

    fn enqueue(&self, envelope: OutgoingEnvelope) -> OutgoingEnvelope {
        self.outgoing.lock().expect("outgoing queue lock poisoned").push_back(envelope.clone());
        envelope
    }

    /// Pop the oldest buffered outgoing envelope, if any.
    pub fn next_outgoing(&self) -> Option<OutgoingEnvelope> {
        self.outgoing.lock().expect("outgoing queue lock poisoned").pop_front()
    }

    /// Users whose device directory entry should be refreshed because a
    /// `start` referenced a device we don't know about. Draining this is
    /// the caller's responsibility.
    pub fn drain_users_for_key_query(&self) -> Vec<String> {
        self.users_for_key_query.lock().expect("key query set lock poisoned").drain().collect()
    }

    /// Start a new verification of `peer_device` as the initiator. Installs
    /// the session and returns the `start` envelope to send.
    pub fn create_sas(&self, peer_device: OlmDevice) -> OutgoingEnvelope {
        let mut session = SasSession::new(self.own_device.clone(), peer_device);
        let content = session.start_verification().expect("a freshly created session can always start");
        let envelope = OutgoingEnvelope::new(
            session.other_device().user_id(),
            session.other_device().device_id(),
            session.transaction_id(),
            crate::messages::VerificationContent::Start(content),
        );

        info!(transaction_id = session.transaction_id(), "created outgoing verification");
        self.sessions.insert(session.transaction_id().to_owned(), session);
        self.enqueue(envelope)
    }

    /// Feed the manager one inbound event, looking up devices through
    /// `directory` as needed. Returns an outgoing envelope if the event
    /// produced one (it is also pushed onto the internal FIFO).
    pub fn receive(&self, event: InboundEvent, directory: &dyn DeviceDirectory) -> Option<OutgoingEnvelope> {
        if let InboundEvent::Start { sender_user_id, sender_device_id, transaction_id, content, raw_json } = event {
            return self.receive_start(sender_user_id, sender_device_id, transaction_id, content, raw_json, directory);
        }

        let transaction_id = event.transaction_id().to_owned();
        let Some(mut session) = self.sessions.get_mut(&transaction_id) else {
            warn!(%transaction_id, "ignoring event for unknown transaction");
            return None;
        };

        if event.sender_user_id() != session.other_device().user_id() {
            let envelope = session.cancel(CancelCode::UserMismatch, "Sender does not match the expected peer");
            return Some(self.enqueue(envelope));
        }

        let outcome = match event {
            InboundEvent::Accept { content, .. } => session.receive_accept(content),
            InboundEvent::Key { content, .. } => session.receive_key(content),
            InboundEvent::Mac { content, .. } => session.receive_mac(content),
            InboundEvent::Cancel { content, .. } => {
                session.receive_cancel(content);
                Ok(ReceiveOutcome::Processed)
            }
            InboundEvent::Start { .. } => unreachable!("handled above"),
        };

        match outcome {
            Ok(ReceiveOutcome::Processed) => None,
            Ok(ReceiveOutcome::Reply(envelope)) | Ok(ReceiveOutcome::Cancel(envelope)) => Some(self.enqueue(envelope)),
            Err(_local_error) => None,
        }
    }

    fn receive_start(
        &self,
        sender_user_id: String,
        sender_device_id: String,
        transaction_id: String,
        content: StartContent,
        raw_json: String,
        directory: &dyn DeviceDirectory,
    ) -> Option<OutgoingEnvelope> {
        let Some(peer_device) = directory.device(&sender_user_id, &sender_device_id) else {
            self.users_for_key_query.lock().expect("key query set lock poisoned").insert(sender_user_id);
            return None;
        };

        let session = SasSession::from_start(self.own_device.clone(), peer_device, transaction_id.clone(), content, &raw_json);
        let cancel_envelope = session.cancel_info().map(|cancel| {
            OutgoingEnvelope::new(
                session.other_device().user_id(),
                session.other_device().device_id(),
                transaction_id.clone(),
                crate::messages::VerificationContent::Cancel(cancel.clone()),
            )
        });

        info!(%transaction_id, canceled = session.is_canceled(), "created responder verification");
        self.sessions.insert(transaction_id, session);

        cancel_envelope.map(|envelope| self.enqueue(envelope))
    }

    /// Garbage-collect: drop sessions that have been terminal for longer
    /// than [`SESSION_GC_AGE`], and age any session that has quietly
    /// exceeded its own timeout without anyone observing it yet.
    pub fn clear_verifications(&self) {
        let mut stale = Vec::new();

        for mut entry in self.sessions.iter_mut() {
            entry.check_timeout();

            if entry.terminal_for().is_some_and(|age| age > SESSION_GC_AGE) {
                stale.push(entry.key().clone());
            }
        }

        for transaction_id in stale {
            self.sessions.remove(&transaction_id);
        }
    }

    /// True iff any session has verified exactly this device's identity
    /// key.
    pub fn is_device_verified(&self, device: &OlmDevice) -> bool {
        self.sessions.iter().any(|entry| {
            entry.other_device().user_id() == device.user_id()
                && entry.other_device().device_id() == device.device_id()
                && entry.is_verified()
        })
    }

    /// Number of sessions currently tracked, including terminal ones not
    /// yet garbage-collected.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Borrow a session by transaction id to drive its per-session
    /// operations (`accept_verification`, `get_key`, `accept_sas`,
    /// `get_mac`, ...) directly. The manager only dispatches inbound wire
    /// events; advancing a session's own side of the flow is the caller's
    /// responsibility.
    pub fn session_mut(&self, transaction_id: &str) -> Option<dashmap::mapref::one::RefMut<'_, String, SasSession>> {
        self.sessions.get_mut(transaction_id)
    }

    /// All transaction ids currently tracked, in no particular order.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

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

//! C3: the SAS verification state machine.
//!
//! A [`SasSession`] is created either as an initiator (via [`SasSession::new`])
//! or as a responder (via [`SasSession::from_start`]), and then driven
//! exclusively through its public methods. Illegal calls never touch the
//! wire: they come back as a [`LocalProtocolError`]. Illegal or suspicious
//! *incoming* messages transition the session to [`SasState::Canceled`] and
//! hand back the `cancel` envelope to send.

mod helpers;

use std::collections::BTreeSet;

pub use helpers::emoji_from_index;
use helpers::{mac_info, sas_info, KEY_IDS_INFO_TAG};
use tracing::{info, instrument, warn};

use crate::{
    crypto::{calculate_commitment, generate_transaction_id, EphemeralKey, SharedSecret},
    error::{LocalProtocolError, VerificationError},
    identities::OlmDevice,
    messages::{
        negotiate_start, validate_accept, AcceptContent, CancelCode, CancelContent, KeyContent, MacContent,
        OutgoingEnvelope, StartContent, VerificationContent,
    },
    time::{self, Timestamp, EVENT_MAX_AGE, SESSION_MAX_AGE},
};

/// The state a [`SasSession`] is visible in from the outside. `WaitingFor*`
/// sub-states from the protocol design are folded into whichever of these
/// they precede; `verified` is tracked separately since it depends on both
/// the local user's confirmation and a validated peer MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SasState {
    Created,
    Started,
    Accepted,
    KeyReceived,
    MacReceived,
    Canceled,
}

/// What happened as a result of feeding a session an inbound protocol event.
#[must_use]
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// The event was valid and processed; nothing needs to go out.
    Processed,
    /// The event was valid and produced an outgoing reply (used today only
    /// by the responder's receipt of the initiator's `key`, which answers
    /// with its own `key`).
    Reply(OutgoingEnvelope),
    /// The event triggered a protocol cancellation; send the envelope.
    Cancel(OutgoingEnvelope),
}

#[derive(Debug)]
struct KeyAgreementState {
    shared: SharedSecret,
    sas_info: String,
    we_accepted_sas: bool,
    mac_sent: bool,
}

#[derive(Debug)]
enum Inner {
    /// Initiator, before or after `start` has been sent (both fold into the
    /// public `Created` state; `sent` distinguishes them for local-misuse
    /// checks).
    Created { ephemeral: EphemeralKey, sent: Option<StartContent> },
    /// Responder, after `from_start`, before or after `accept` has been
    /// sent.
    Started { ephemeral: EphemeralKey, peer_start: StartContent, commitment: String, sent_accept: bool },
    /// Initiator only; responder skips this state entirely.
    Accepted { ephemeral: EphemeralKey, our_start: StartContent, peer_commitment: String, key_sent: bool },
    KeyReceived(KeyAgreementState),
    MacReceived { verified_devices: BTreeSet<String> },
    Canceled(CancelContent),
}

/// One SAS device-verification attempt.
#[derive(Debug)]
pub struct SasSession {
    own_device: OlmDevice,
    other_device: OlmDevice,
    transaction_id: String,
    we_started: bool,
    creation_time: Timestamp,
    last_event_time: Timestamp,
    we_accepted_sas: bool,
    their_device_verified: bool,
    inner: Inner,
    /// Set the instant this session first became terminal (verified or
    /// canceled); used by the manager's GC sweep, not by the session itself.
    terminal_time: Option<Timestamp>,
}

impl SasSession {
    /// Create a new session as the initiator. Does not yet emit anything;
    /// call [`Self::start_verification`] to get the `start` payload.
    pub fn new(own_device: OlmDevice, other_device: OlmDevice) -> Self {
        let now = time::now();
        Self {
            own_device,
            other_device,
            transaction_id: generate_transaction_id(),
            we_started: true,
            creation_time: now,
            last_event_time: now,
            we_accepted_sas: false,
            their_device_verified: false,
            inner: Inner::Created { ephemeral: EphemeralKey::generate(), sent: None },
            terminal_time: None,
        }
    }

    /// Create a new session as the responder to an inbound `start` event.
    ///
    /// `raw_start_json` must be the exact bytes the `start` content was
    /// received as; it is what the commitment is computed over, per
    /// [`calculate_commitment`]'s contract.
    ///
    /// Returns a canceled session if the peer's `start` didn't advertise a
    /// method/algorithm set we support; the caller should still install the
    /// session (so a replayed event is a duplicate, not a fresh accept) and
    /// forward the cancel.
    pub fn from_start(
        own_device: OlmDevice,
        other_device: OlmDevice,
        transaction_id: String,
        start_content: StartContent,
        raw_start_json: &str,
    ) -> Self {
        let now = time::now();

        let inner = match negotiate_start(&start_content) {
            Ok(_choices) => {
                let ephemeral = EphemeralKey::generate();
                let commitment = calculate_commitment(raw_start_json, &ephemeral.public_key_base64());
                Inner::Started { ephemeral, peer_start: start_content, commitment, sent_accept: false }
            }
            Err(err) => Inner::Canceled(CancelContent::new(err.cancel_code(), cancel_reason(err.cancel_code()))),
        };

        let terminal_time = matches!(inner, Inner::Canceled(_)).then_some(now);

        Self {
            own_device,
            other_device,
            transaction_id,
            we_started: false,
            creation_time: now,
            last_event_time: now,
            we_accepted_sas: false,
            their_device_verified: false,
            inner,
            terminal_time,
        }
    }

    /// This session's transaction id.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Whether we initiated this verification.
    pub fn we_started(&self) -> bool {
        self.we_started
    }

    /// The device being verified.
    pub fn other_device(&self) -> &OlmDevice {
        &self.other_device
    }

    /// The publicly visible state.
    pub fn state(&self) -> SasState {
        match &self.inner {
            Inner::Created { .. } => SasState::Created,
            Inner::Started { .. } => SasState::Started,
            Inner::Accepted { .. } => SasState::Accepted,
            Inner::KeyReceived(_) => SasState::KeyReceived,
            Inner::MacReceived { .. } => SasState::MacReceived,
            Inner::Canceled(_) => SasState::Canceled,
        }
    }

    /// True once the peer's MAC has validated the exact device we set out
    /// to verify, and we've locally confirmed the SAS ourselves.
    pub fn is_verified(&self) -> bool {
        matches!(self.inner, Inner::MacReceived { .. }) && self.we_accepted_sas && self.their_device_verified
    }

    /// True once in [`SasState::Canceled`], for any reason including a
    /// timeout.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner, Inner::Canceled(_))
    }

    /// True iff canceled specifically because of a timeout.
    pub fn is_timed_out(&self) -> bool {
        matches!(&self.inner, Inner::Canceled(content) if content.code == CancelCode::Timeout)
    }

    /// The cancellation payload, if canceled; calling this repeatedly always
    /// returns the same content, matching the property that a cancel is
    /// idempotent and replayable.
    pub fn cancel_info(&self) -> Option<&CancelContent> {
        match &self.inner {
            Inner::Canceled(content) => Some(content),
            _ => None,
        }
    }

    fn envelope(&self, content: VerificationContent) -> OutgoingEnvelope {
        OutgoingEnvelope::new(
            self.other_device.user_id(),
            self.other_device.device_id(),
            self.transaction_id.clone(),
            content,
        )
    }

    /// Cancel the session locally (user aborted, or the UI detected a SAS
    /// mismatch). Idempotent: calling this again on an already-canceled
    /// session just returns the existing cancel payload.
    #[instrument(skip(self), fields(transaction_id = %self.transaction_id))]
    pub fn cancel(&mut self, code: CancelCode, reason: impl Into<String>) -> OutgoingEnvelope {
        if !matches!(self.inner, Inner::Canceled(_)) {
            warn!(?code, "canceling verification");
            self.inner = Inner::Canceled(CancelContent::new(code, reason.into()));
            self.terminal_time = Some(time::now());
        }
        self.envelope(VerificationContent::Cancel(self.cancel_info().expect("just set to Canceled").clone()))
    }

    /// Apply an inbound `cancel` from the peer. Always succeeds; canceling
    /// an already-canceled session is a no-op.
    pub fn receive_cancel(&mut self, content: CancelContent) {
        if !matches!(self.inner, Inner::Canceled(_)) {
            self.last_event_time = time::now();
            self.inner = Inner::Canceled(content);
            self.terminal_time = Some(self.last_event_time);
        }
    }

    /// How long this session has been in a terminal state (verified or
    /// canceled), if it is one. Used by the manager's GC sweep.
    pub fn terminal_for(&self) -> Option<std::time::Duration> {
        self.terminal_time.map(|t| time::now().duration_since(t))
    }

    /// Test-only seam: push `terminal_time` back by `age`, as if this
    /// already-terminal session had been sitting untouched since then. Lets
    /// the manager's GC sweep be exercised without a real sleep.
    #[cfg(test)]
    pub(crate) fn backdate_terminal_time(&mut self, age: std::time::Duration) {
        self.terminal_time =
            Some(self.terminal_time.expect("only call this on an already-terminal session") - age);
    }

    /// Check both timeouts against the current time, canceling the session
    /// if either has elapsed. Called at the top of every externally
    /// triggered operation, per the protocol's timeout contract; also
    /// exposed for the manager's periodic GC sweep to age stale sessions
    /// that haven't been touched recently.
    pub fn check_timeout(&mut self) {
        if matches!(self.inner, Inner::Canceled(_)) {
            return;
        }

        let now = time::now();
        let session_expired = now.duration_since(self.creation_time) > SESSION_MAX_AGE;
        let event_expired = now.duration_since(self.last_event_time) > EVENT_MAX_AGE;

        if session_expired || event_expired {
            warn!(transaction_id = %self.transaction_id, "verification timed out");
            self.terminal_time = Some(now);
            self.inner =
                Inner::Canceled(CancelContent::new(CancelCode::Timeout, "Verification timed out".to_owned()));
        }
    }

    fn guard_not_terminal(&mut self) -> Result<(), LocalProtocolError> {
        self.check_timeout();
        match &self.inner {
            Inner::Canceled(_) => Err(LocalProtocolError::AlreadyCancelled),
            _ if self.is_verified() => Err(LocalProtocolError::AlreadyDone),
            _ => Ok(()),
        }
    }

    /// Build and (conceptually) hand over the `start` payload. May only be
    /// called once.
    #[instrument(skip(self), fields(transaction_id = %self.transaction_id))]
    pub fn start_verification(&mut self) -> Result<StartContent, LocalProtocolError> {
        self.guard_not_terminal()?;

        match &mut self.inner {
            Inner::Created { sent: sent @ None, .. } => {
                let content = StartContent::ours(self.own_device.device_id());
                *sent = Some(content.clone());
                info!("sent verification start");
                Ok(content)
            }
            Inner::Created { sent: Some(_), .. } => Err(LocalProtocolError::AlreadyStarted),
            _ => Err(LocalProtocolError::AlreadyStarted),
        }
    }

    /// Build and hand over the `accept` payload for a responder session.
    /// May only be called once, after [`Self::from_start`].
    #[instrument(skip(self), fields(transaction_id = %self.transaction_id))]
    pub fn accept_verification(&mut self) -> Result<AcceptContent, LocalProtocolError> {
        self.guard_not_terminal()?;

        match &mut self.inner {
            Inner::Started { ephemeral, peer_start, commitment, sent_accept } => {
                if *sent_accept {
                    return Err(LocalProtocolError::CannotAccept);
                }
                let choices = negotiate_start(peer_start).expect("from_start already validated this start");
                let content = choices.into_content(commitment.clone());
                *sent_accept = true;
                let _ = ephemeral;
                info!("sent verification accept");
                Ok(content)
            }
            _ => Err(LocalProtocolError::CannotAccept),
        }
    }

    /// Apply an inbound `accept` (initiator only).
    #[instrument(skip(self, content), fields(transaction_id = %self.transaction_id))]
    pub fn receive_accept(&mut self, content: AcceptContent) -> Result<ReceiveOutcome, LocalProtocolError> {
        self.guard_not_terminal()?;
        self.last_event_time = time::now();

        match std::mem::replace(&mut self.inner, Inner::Canceled(CancelContent::new(CancelCode::UserError, String::new()))) {
            Inner::Created { ephemeral, sent: Some(our_start) } => {
                match validate_accept(&our_start, &content) {
                    Ok(()) => {
                        self.inner = Inner::Accepted {
                            ephemeral,
                            our_start,
                            peer_commitment: content.commitment,
                            key_sent: false,
                        };
                        info!("verification accepted by peer");
                        Ok(ReceiveOutcome::Processed)
                    }
                    Err(err) => {
                        self.inner = Inner::Created { ephemeral, sent: Some(our_start) };
                        Ok(ReceiveOutcome::Cancel(self.cancel(err.cancel_code(), cancel_reason(err.cancel_code()))))
                    }
                }
            }
            Inner::Accepted { ephemeral, our_start, peer_commitment, key_sent } => {
                // Duplicate accept.
                self.inner = Inner::Accepted { ephemeral, our_start, peer_commitment, key_sent };
                Ok(ReceiveOutcome::Cancel(self.cancel(CancelCode::UnexpectedMessage, cancel_reason(CancelCode::UnexpectedMessage))))
            }
            other => {
                self.inner = other;
                Ok(ReceiveOutcome::Cancel(self.cancel(CancelCode::UnexpectedMessage, cancel_reason(CancelCode::UnexpectedMessage))))
            }
        }
    }

    /// Build and hand over our `key` payload (initiator only; the responder
    /// sends its key as a side effect of [`Self::receive_key`]).
    #[instrument(skip(self), fields(transaction_id = %self.transaction_id))]
    pub fn get_key(&mut self) -> Result<KeyContent, LocalProtocolError> {
        self.guard_not_terminal()?;

        match &mut self.inner {
            Inner::Accepted { ephemeral, key_sent, .. } if !*key_sent => {
                let key = ephemeral.public_key_base64();
                *key_sent = true;
                Ok(KeyContent { key })
            }
            Inner::Accepted { .. } => Err(LocalProtocolError::UnexpectedKey),
            _ => Err(LocalProtocolError::UnexpectedKey),
        }
    }

    /// Apply an inbound `key` payload.
    ///
    /// On the initiator side this verifies the responder's commitment
    /// against the `start` we originally sent; on the responder side it
    /// produces our own `key` as a reply, which is what makes the
    /// commitment binding (we never reveal our key before seeing theirs).
    #[instrument(skip(self, content), fields(transaction_id = %self.transaction_id))]
    pub fn receive_key(&mut self, content: KeyContent) -> Result<ReceiveOutcome, LocalProtocolError> {
        self.guard_not_terminal()?;
        self.last_event_time = time::now();

        let placeholder = Inner::Canceled(CancelContent::new(CancelCode::UserError, String::new()));
        match std::mem::replace(&mut self.inner, placeholder) {
            Inner::Accepted { ephemeral, our_start, peer_commitment, key_sent } if key_sent => {
                let own_public = ephemeral.public_key_base64();
                match ephemeral.agree(&content.key) {
                    Ok(shared) => {
                        let expected = calculate_commitment(&our_start.canonical_json(), &content.key);
                        if expected != peer_commitment {
                            self.inner = Inner::Canceled(CancelContent::new(
                                CancelCode::KeyMismatch,
                                cancel_reason(CancelCode::KeyMismatch),
                            ));
                            self.terminal_time = Some(time::now());
                            return Ok(ReceiveOutcome::Cancel(self.cancel_envelope_from_current()));
                        }

                        let info = sas_info(
                            self.own_device.user_id(),
                            self.own_device.device_id(),
                            &own_public,
                            self.other_device.user_id(),
                            self.other_device.device_id(),
                            &content.key,
                            &self.transaction_id,
                            self.we_started,
                        );
                        self.inner = Inner::KeyReceived(KeyAgreementState {
                            shared,
                            sas_info: info,
                            we_accepted_sas: false,
                            mac_sent: false,
                        });
                        info!("key agreement complete");
                        Ok(ReceiveOutcome::Processed)
                    }
                    Err(err) => {
                        self.inner = Inner::Canceled(CancelContent::new(err.cancel_code(), cancel_reason(err.cancel_code())));
                        self.terminal_time = Some(time::now());
                        Ok(ReceiveOutcome::Cancel(self.cancel_envelope_from_current()))
                    }
                }
            }
            Inner::Started { ephemeral, peer_start, commitment, sent_accept } if sent_accept => {
                let own_public = ephemeral.public_key_base64();
                match ephemeral.agree(&content.key) {
                    Ok(shared) => {
                        let _ = (peer_start, commitment);
                        let our_key = KeyContent { key: own_public.clone() };
                        let info = sas_info(
                            self.own_device.user_id(),
                            self.own_device.device_id(),
                            &own_public,
                            self.other_device.user_id(),
                            self.other_device.device_id(),
                            &content.key,
                            &self.transaction_id,
                            self.we_started,
                        );
                        self.inner = Inner::KeyReceived(KeyAgreementState {
                            shared,
                            sas_info: info,
                            we_accepted_sas: false,
                            mac_sent: false,
                        });
                        info!("key agreement complete, replying with our key");
                        Ok(ReceiveOutcome::Reply(self.envelope(VerificationContent::Key(our_key))))
                    }
                    Err(err) => {
                        self.inner = Inner::Canceled(CancelContent::new(err.cancel_code(), cancel_reason(err.cancel_code())));
                        self.terminal_time = Some(time::now());
                        Ok(ReceiveOutcome::Cancel(self.cancel_envelope_from_current()))
                    }
                }
            }
            other => {
                self.inner = other;
                Ok(ReceiveOutcome::Cancel(self.cancel(CancelCode::UnexpectedMessage, cancel_reason(CancelCode::UnexpectedMessage))))
            }
        }
    }

    fn cancel_envelope_from_current(&self) -> OutgoingEnvelope {
        let content = self.cancel_info().expect("caller just set Canceled").clone();
        self.envelope(VerificationContent::Cancel(content))
    }

    /// The short authentication string as emoji, `(emoji, name)` pairs.
    /// Requires [`SasState::KeyReceived`] or later.
    pub fn emoji(&self) -> Result<Vec<(&'static str, &'static str)>, LocalProtocolError> {
        self.sas_bytes().map(|bytes| bytes.emoji_indices().iter().map(|&i| emoji_from_index(i)).collect())
    }

    /// The short authentication string as three 4-digit decimal groups.
    pub fn decimal(&self) -> Result<(u16, u16, u16), LocalProtocolError> {
        self.sas_bytes().map(|bytes| bytes.decimals())
    }

    fn sas_bytes(&self) -> Result<vodozemac::sas::SasBytes, LocalProtocolError> {
        match &self.inner {
            Inner::KeyReceived(state) => Ok(state.shared.sas_bytes(&state.sas_info)),
            Inner::MacReceived { .. } => Err(LocalProtocolError::SasNotReady),
            _ => Err(LocalProtocolError::SasNotReady),
        }
    }

    /// Record that the local user confirmed the displayed SAS matches.
    /// Required before [`Self::get_mac`] will succeed.
    #[instrument(skip(self), fields(transaction_id = %self.transaction_id))]
    pub fn accept_sas(&mut self) -> Result<(), LocalProtocolError> {
        self.guard_not_terminal()?;

        match &mut self.inner {
            Inner::KeyReceived(state) => {
                state.we_accepted_sas = true;
                self.we_accepted_sas = true;
                info!("local user confirmed the short authentication string");
                Ok(())
            }
            _ => Err(LocalProtocolError::SasNotReady),
        }
    }

    /// Build and hand over our `mac` payload. Requires a prior
    /// [`Self::accept_sas`].
    #[instrument(skip(self), fields(transaction_id = %self.transaction_id))]
    pub fn get_mac(&mut self) -> Result<MacContent, LocalProtocolError> {
        self.guard_not_terminal()?;

        match &mut self.inner {
            Inner::KeyReceived(state) if state.we_accepted_sas && !state.mac_sent => {
                let key_id = self.own_device.ed25519_key_id();
                let info = mac_info(
                    self.own_device.user_id(),
                    self.own_device.device_id(),
                    self.other_device.user_id(),
                    self.other_device.device_id(),
                    &self.transaction_id,
                    &key_id,
                );
                let mac_value = state.shared.mac(self.own_device.ed25519_key(), &info);

                let mut mac = std::collections::BTreeMap::new();
                mac.insert(key_id.clone(), mac_value);

                let keys_info = mac_info(
                    self.own_device.user_id(),
                    self.own_device.device_id(),
                    self.other_device.user_id(),
                    self.other_device.device_id(),
                    &self.transaction_id,
                    KEY_IDS_INFO_TAG,
                );
                let keys_mac = state.shared.mac(&key_id, &keys_info);

                state.mac_sent = true;
                info!("sent verification mac");
                Ok(MacContent { mac, keys: keys_mac })
            }
            Inner::KeyReceived(state) if !state.we_accepted_sas => Err(LocalProtocolError::SasNotAccepted),
            _ => Err(LocalProtocolError::SasNotAccepted),
        }
    }

    /// Apply an inbound `mac` payload: validate the `keys` MAC, then every
    /// individual key MAC, marking each verified key and the peer device
    /// overall if its `ed25519:<device_id>` entry matched.
    #[instrument(skip(self, content), fields(transaction_id = %self.transaction_id))]
    pub fn receive_mac(&mut self, content: MacContent) -> Result<ReceiveOutcome, LocalProtocolError> {
        self.guard_not_terminal()?;
        self.last_event_time = time::now();

        let placeholder = Inner::Canceled(CancelContent::new(CancelCode::UserError, String::new()));
        match std::mem::replace(&mut self.inner, placeholder) {
            Inner::KeyReceived(state) => {
                let mut key_ids: Vec<&str> = content.mac.keys().map(String::as_str).collect();
                key_ids.sort_unstable();
                let joined = key_ids.join(",");

                let keys_info = mac_info(
                    self.other_device.user_id(),
                    self.other_device.device_id(),
                    self.own_device.user_id(),
                    self.own_device.device_id(),
                    &self.transaction_id,
                    KEY_IDS_INFO_TAG,
                );
                let expected_keys_mac = state.shared.mac(&joined, &keys_info);

                if expected_keys_mac != content.keys {
                    self.inner = Inner::Canceled(CancelContent::new(
                        CancelCode::KeyMismatch,
                        cancel_reason(CancelCode::KeyMismatch),
                    ));
                    self.terminal_time = Some(time::now());
                    return Ok(ReceiveOutcome::Cancel(self.cancel_envelope_from_current()));
                }

                let mut verified_devices = BTreeSet::new();
                for (key_id, claimed_mac) in &content.mac {
                    let info = mac_info(
                        self.other_device.user_id(),
                        self.other_device.device_id(),
                        self.own_device.user_id(),
                        self.own_device.device_id(),
                        &self.transaction_id,
                        key_id,
                    );

                    let expected = if key_id == &self.other_device.ed25519_key_id() {
                        state.shared.mac(self.other_device.ed25519_key(), &info)
                    } else {
                        // We don't hold key material for ids we don't recognize; such
                        // an entry can never validate and is treated as a mismatch.
                        String::new()
                    };

                    if expected.is_empty() || &expected != claimed_mac {
                        self.inner = Inner::Canceled(CancelContent::new(
                            CancelCode::KeyMismatch,
                            cancel_reason(CancelCode::KeyMismatch),
                        ));
                        self.terminal_time = Some(time::now());
                        return Ok(ReceiveOutcome::Cancel(self.cancel_envelope_from_current()));
                    }

                    verified_devices.insert(key_id.clone());
                }

                if verified_devices.contains(&self.other_device.ed25519_key_id()) {
                    self.their_device_verified = true;
                }

                self.inner = Inner::MacReceived { verified_devices };
                if self.we_accepted_sas && self.their_device_verified {
                    self.terminal_time = Some(time::now());
                }
                info!(verified = self.is_verified(), "received and validated verification mac");
                Ok(ReceiveOutcome::Processed)
            }
            other => {
                self.inner = other;
                Ok(ReceiveOutcome::Cancel(self.cancel(CancelCode::UnexpectedMessage, cancel_reason(CancelCode::UnexpectedMessage))))
            }
        }
    }
}

fn cancel_reason(code: CancelCode) -> String {
    match code {
        CancelCode::User => "Canceled by user".to_owned(),
        CancelCode::Timeout => "Verification timed out".to_owned(),
        CancelCode::UnknownTransaction => "Unknown transaction".to_owned(),
        CancelCode::UnknownMethod => "Unknown verification method".to_owned(),
        CancelCode::UnexpectedMessage => "Unexpected message received".to_owned(),
        CancelCode::KeyMismatch => "Key mismatch detected".to_owned(),
        CancelCode::UserMismatch => "Verification sent from wrong user".to_owned(),
        CancelCode::InvalidMessage => "Invalid message received".to_owned(),
        CancelCode::Accepted => "Verification accepted by another device".to_owned(),
        CancelCode::UserError => "Verification failed".to_owned(),
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::identities::test_data::{alice_device, bob_device};

    fn setup() -> (SasSession, SasSession) {
        let alice_device = alice_device();
        let bob_device = bob_device();

        let mut alice = SasSession::new(alice_device.clone(), bob_device.clone());
        let start = alice.start_verification().unwrap();
        let raw_start = start.canonical_json();

        let bob = SasSession::from_start(bob_device, alice_device, alice.transaction_id().to_owned(), start, &raw_start);

        (alice, bob)
    }

    fn run_to_verified(alice: &mut SasSession, bob: &mut SasSession) {
        let accept = bob.accept_verification().unwrap();
        alice.receive_accept(accept).unwrap();

        let alice_key = alice.get_key().unwrap();
        let outcome = bob.receive_key(alice_key).unwrap();
        let bob_key = match outcome {
            ReceiveOutcome::Reply(envelope) => match envelope.content {
                VerificationContent::Key(key) => key,
                _ => panic!("expected a key reply"),
            },
            _ => panic!("responder must reply with its own key"),
        };
        alice.receive_key(bob_key).unwrap();

        alice.accept_sas().unwrap();
        bob.accept_sas().unwrap();

        let alice_mac = alice.get_mac().unwrap();
        let bob_mac = bob.get_mac().unwrap();

        bob.receive_mac(alice_mac).unwrap();
        alice.receive_mac(bob_mac).unwrap();
    }

    #[test]
    fn happy_path_both_sides_verify_and_agree_on_sas() {
        let (mut alice, mut bob) = setup();
        run_to_verified(&mut alice, &mut bob);

        assert!(alice.is_verified());
        assert!(bob.is_verified());
        assert_eq!(alice.state(), SasState::MacReceived);
        assert_eq!(bob.state(), SasState::MacReceived);
    }

    #[test]
    fn both_sides_derive_identical_sas_bytes() {
        let (mut alice, mut bob) = setup();

        let accept = bob.accept_verification().unwrap();
        alice.receive_accept(accept).unwrap();
        let alice_key = alice.get_key().unwrap();
        let outcome = bob.receive_key(alice_key).unwrap();
        let bob_key = match outcome {
            ReceiveOutcome::Reply(envelope) => match envelope.content {
                VerificationContent::Key(key) => key,
                _ => panic!("expected a key reply"),
            },
            _ => panic!("responder must reply with its own key"),
        };
        alice.receive_key(bob_key).unwrap();

        assert_eq!(alice.emoji().unwrap(), bob.emoji().unwrap());
        assert_eq!(alice.decimal().unwrap(), bob.decimal().unwrap());
    }

    #[test]
    fn mirrored_key_is_rejected_as_key_mismatch() {
        let (mut alice, mut bob) = setup();

        let accept = bob.accept_verification().unwrap();
        alice.receive_accept(accept).unwrap();

        let alice_key = alice.get_key().unwrap();
        // Responder's own key is mirrored back at the initiator instead of
        // the responder's real ephemeral key.
        let outcome = alice.receive_key(alice_key).unwrap();

        match outcome {
            ReceiveOutcome::Cancel(envelope) => match envelope.content {
                VerificationContent::Cancel(content) => assert_eq!(content.code, CancelCode::KeyMismatch),
                _ => panic!("expected a cancel"),
            },
            _ => panic!("expected a cancel outcome"),
        }
        assert!(alice.is_canceled());
        assert_eq!(alice.cancel_info().unwrap().code, CancelCode::KeyMismatch);
    }

    #[test]
    fn tampered_mac_keys_field_cancels_and_leaves_unverified() {
        let (mut alice, mut bob) = setup();

        let accept = bob.accept_verification().unwrap();
        alice.receive_accept(accept).unwrap();
        let alice_key = alice.get_key().unwrap();
        let outcome = bob.receive_key(alice_key).unwrap();
        let bob_key = match outcome {
            ReceiveOutcome::Reply(envelope) => match envelope.content {
                VerificationContent::Key(key) => key,
                _ => panic!("expected a key reply"),
            },
            _ => panic!("responder must reply with its own key"),
        };
        alice.receive_key(bob_key).unwrap();

        alice.accept_sas().unwrap();
        bob.accept_sas().unwrap();

        let mut alice_mac = alice.get_mac().unwrap();
        alice_mac.keys = "FAKEKEYS".to_owned();

        let outcome = bob.receive_mac(alice_mac).unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Cancel(_)));
        assert!(bob.is_canceled());
        assert!(!bob.is_verified());
    }

    #[test]
    fn unknown_method_is_canceled_immediately_from_start() {
        let alice_device = alice_device();
        let bob_device = bob_device();

        let mut start = StartContent::ours(alice_device.device_id());
        start.method = "m.sas.v0".to_owned();
        let raw = start.canonical_json();

        let bob = SasSession::from_start(bob_device, alice_device, generate_transaction_id(), start, &raw);

        assert!(bob.is_canceled());
        assert_eq!(bob.cancel_info().unwrap().code, CancelCode::UnknownMethod);
    }

    #[test]
    fn session_times_out_after_session_max_age() {
        let (mut alice, _bob) = setup();

        alice.creation_time = time::now() - Duration::from_secs(5 * 60);
        alice.check_timeout();
        assert!(!alice.is_timed_out());

        alice.creation_time = time::now() - Duration::from_secs(11 * 60);
        alice.check_timeout();
        assert!(alice.is_timed_out());
        assert!(alice.is_canceled());
    }

    #[test]
    fn session_times_out_after_event_max_age() {
        let (mut alice, mut bob) = setup();
        let accept = bob.accept_verification().unwrap();
        alice.receive_accept(accept).unwrap();

        alice.last_event_time = time::now() - Duration::from_secs(2 * 60);
        alice.check_timeout();
        assert!(alice.is_timed_out());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (mut alice, _bob) = setup();
        let first = alice.cancel(CancelCode::User, "Canceled by user");
        let second = alice.cancel(CancelCode::User, "Canceled by user");

        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_accept_cancels_the_initiator() {
        let (mut alice, mut bob) = setup();
        let accept = bob.accept_verification().unwrap();

        let first = alice.receive_accept(accept.clone()).unwrap();
        assert!(matches!(first, ReceiveOutcome::Processed));
        assert!(!alice.is_canceled());

        let second = alice.receive_accept(accept).unwrap();
        assert!(matches!(second, ReceiveOutcome::Cancel(_)));
        assert!(alice.is_canceled());
        assert_eq!(alice.cancel_info().unwrap().code, CancelCode::UnexpectedMessage);
    }

    #[test]
    fn operations_after_cancel_are_local_errors() {
        let (mut alice, _bob) = setup();
        alice.cancel(CancelCode::User, "Canceled by user");

        assert_eq!(alice.start_verification().unwrap_err(), LocalProtocolError::AlreadyCancelled);
        assert_eq!(alice.accept_sas().unwrap_err(), LocalProtocolError::AlreadyCancelled);
    }
}

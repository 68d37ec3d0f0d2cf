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

//! C2: the five `m.key.verification.*` payload shapes and the outgoing
//! envelope that wraps them for the transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VerificationError;

/// The key agreement protocol this crate supports. The responder must pick
/// from the initiator's advertised list; this is the only value we'd ever
/// pick or accept.
pub const KEY_AGREEMENT_PROTOCOL: &str = "curve25519";
/// The only supported commitment hash.
pub const HASH_ALGORITHM: &str = "sha256";
/// The only supported MAC method.
pub const MAC_METHOD: &str = "hkdf-hmac-sha256";
/// Both rendering methods are always advertised; the user picks which one to
/// look at, not the protocol.
pub const SHORT_AUTH_STRING_METHODS: [&str; 2] = ["emoji", "decimal"];
/// The only verification method this crate speaks.
pub const VERIFICATION_METHOD: &str = "m.sas.v1";

/// `m.key.verification.cancel` reason codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelCode {
    #[serde(rename = "m.user")]
    User,
    #[serde(rename = "m.timeout")]
    Timeout,
    #[serde(rename = "m.unknown_transaction")]
    UnknownTransaction,
    #[serde(rename = "m.unknown_method")]
    UnknownMethod,
    #[serde(rename = "m.unexpected_message")]
    UnexpectedMessage,
    #[serde(rename = "m.key_mismatch")]
    KeyMismatch,
    #[serde(rename = "m.user_mismatch")]
    UserMismatch,
    #[serde(rename = "m.invalid_message")]
    InvalidMessage,
    #[serde(rename = "m.accepted")]
    Accepted,
    #[serde(rename = "m.user_error")]
    UserError,
}

impl CancelCode {
    /// The wire string for this code, e.g. `"m.key_mismatch"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelCode::User => "m.user",
            CancelCode::Timeout => "m.timeout",
            CancelCode::UnknownTransaction => "m.unknown_transaction",
            CancelCode::UnknownMethod => "m.unknown_method",
            CancelCode::UnexpectedMessage => "m.unexpected_message",
            CancelCode::KeyMismatch => "m.key_mismatch",
            CancelCode::UserMismatch => "m.user_mismatch",
            CancelCode::InvalidMessage => "m.invalid_message",
            CancelCode::Accepted => "m.accepted",
            CancelCode::UserError => "m.user_error",
        }
    }
}

/// `m.key.verification.start` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartContent {
    pub from_device: String,
    pub method: String,
    pub key_agreement_protocols: Vec<String>,
    pub hashes: Vec<String>,
    pub message_authentication_codes: Vec<String>,
    pub short_authentication_string: Vec<String>,
}

impl StartContent {
    /// Build the `start` content we'd send as an initiator: always
    /// `m.sas.v1` advertising exactly the options this crate supports.
    pub fn new(
        from_device: String,
        key_agreement_protocols: Vec<String>,
        hashes: Vec<String>,
        message_authentication_codes: Vec<String>,
        short_authentication_string: Vec<String>,
    ) -> Self {
        Self {
            from_device,
            method: VERIFICATION_METHOD.to_owned(),
            key_agreement_protocols,
            hashes,
            message_authentication_codes,
            short_authentication_string,
        }
    }

    /// This crate's own default advertisement: one protocol, one hash, one
    /// MAC method, both SAS renderings.
    pub fn ours(from_device: impl Into<String>) -> Self {
        Self::new(
            from_device.into(),
            vec![KEY_AGREEMENT_PROTOCOL.to_owned()],
            vec![HASH_ALGORITHM.to_owned()],
            vec![MAC_METHOD.to_owned()],
            SHORT_AUTH_STRING_METHODS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Serialize to the canonical JSON form: `serde_json`'s default `Map` is
    /// BTreeMap-backed, so routing through [`serde_json::Value`] sorts keys
    /// lexicographically and produces no insignificant whitespace.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).expect("StartContent always serializes");
        serde_json::to_string(&value).expect("a JSON Value always serializes")
    }
}

/// `m.key.verification.accept` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptContent {
    pub method: String,
    pub key_agreement_protocol: String,
    pub hash: String,
    pub message_authentication_code: String,
    pub short_authentication_string: Vec<String>,
    pub commitment: String,
}

/// `m.key.verification.key` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyContent {
    pub key: String,
}

/// `m.key.verification.mac` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacContent {
    pub mac: BTreeMap<String, String>,
    pub keys: String,
}

/// `m.key.verification.cancel` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelContent {
    pub code: CancelCode,
    pub reason: String,
}

impl CancelContent {
    pub fn new(code: CancelCode, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }
}

/// The sum of all five payload shapes, each still missing its
/// `transaction_id` (carried separately by [`OutgoingEnvelope`]).
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationContent {
    Start(StartContent),
    Accept(AcceptContent),
    Key(KeyContent),
    Mac(MacContent),
    Cancel(CancelContent),
}

/// An opaque message ready for the transport to deliver to a single peer
/// device. The transport is responsible for attaching `transaction_id` to
/// the serialized body and actually sending it; this crate never touches a
/// socket.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingEnvelope {
    pub recipient_user: String,
    pub recipient_device: String,
    pub transaction_id: String,
    pub content: VerificationContent,
}

impl OutgoingEnvelope {
    pub(crate) fn new(
        recipient_user: impl Into<String>,
        recipient_device: impl Into<String>,
        transaction_id: impl Into<String>,
        content: VerificationContent,
    ) -> Self {
        Self {
            recipient_user: recipient_user.into(),
            recipient_device: recipient_device.into(),
            transaction_id: transaction_id.into(),
            content,
        }
    }

    /// The `m.key.verification.*` event type this envelope's content maps
    /// to, exactly as it would appear in a to-device event's `type` field.
    pub fn message_type(&self) -> &'static str {
        match &self.content {
            VerificationContent::Start(_) => "m.key.verification.start",
            VerificationContent::Accept(_) => "m.key.verification.accept",
            VerificationContent::Key(_) => "m.key.verification.key",
            VerificationContent::Mac(_) => "m.key.verification.mac",
            VerificationContent::Cancel(_) => "m.key.verification.cancel",
        }
    }
}

/// Validate an inbound `start` and pick the responder's choices, or return
/// the [`VerificationError`] that should become a `cancel`.
pub fn negotiate_start(start: &StartContent) -> Result<AcceptChoices, VerificationError> {
    if start.method != VERIFICATION_METHOD {
        return Err(VerificationError::UnknownMethod);
    }

    if !start.key_agreement_protocols.iter().any(|p| p == KEY_AGREEMENT_PROTOCOL) {
        return Err(VerificationError::UnknownMethod);
    }
    if !start.hashes.iter().any(|h| h == HASH_ALGORITHM) {
        return Err(VerificationError::UnknownMethod);
    }
    if !start.message_authentication_codes.iter().any(|m| m == MAC_METHOD) {
        return Err(VerificationError::UnknownMethod);
    }
    let key_agreement_protocol = KEY_AGREEMENT_PROTOCOL.to_owned();
    let hash = HASH_ALGORITHM.to_owned();
    let message_authentication_code = MAC_METHOD.to_owned();

    let short_authentication_string: Vec<String> = SHORT_AUTH_STRING_METHODS
        .iter()
        .filter(|o| start.short_authentication_string.iter().any(|t| t == *o))
        .map(|s| s.to_string())
        .collect();
    if short_authentication_string.is_empty() {
        return Err(VerificationError::UnknownMethod);
    }

    Ok(AcceptChoices { key_agreement_protocol, hash, message_authentication_code, short_authentication_string })
}

/// The responder's negotiated choices, prior to computing the commitment
/// that turns this into a full [`AcceptContent`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptChoices {
    pub key_agreement_protocol: String,
    pub hash: String,
    pub message_authentication_code: String,
    pub short_authentication_string: Vec<String>,
}

impl AcceptChoices {
    pub fn into_content(self, commitment: String) -> AcceptContent {
        AcceptContent {
            method: VERIFICATION_METHOD.to_owned(),
            key_agreement_protocol: self.key_agreement_protocol,
            hash: self.hash,
            message_authentication_code: self.message_authentication_code,
            short_authentication_string: self.short_authentication_string,
            commitment,
        }
    }
}

/// Validate that an inbound `accept` chose options we actually advertised.
pub fn validate_accept(start: &StartContent, accept: &AcceptContent) -> Result<(), VerificationError> {
    if accept.method != VERIFICATION_METHOD
        || !start.key_agreement_protocols.contains(&accept.key_agreement_protocol)
        || !start.hashes.contains(&accept.hash)
        || !start.message_authentication_codes.contains(&accept.message_authentication_code)
        || accept.short_authentication_string.is_empty()
        || !accept
            .short_authentication_string
            .iter()
            .all(|m| start.short_authentication_string.contains(m))
    {
        return Err(VerificationError::UnknownMethod);
    }

    Ok(())
}

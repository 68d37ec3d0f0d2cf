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

//! C1: the cryptographic primitives the state machine is built on.
//!
//! Key agreement, SAS byte derivation and MAC calculation are delegated to
//! [`vodozemac`]'s `sas` module, which implements the X25519 + HKDF-SHA-256 +
//! HMAC-SHA-256 triple the network standard mandates. This module only adds
//! the bits `vodozemac` doesn't know about: transaction ids and the
//! accept-commitment hash.

use std::fmt;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use vodozemac::{sas::Sas, Curve25519PublicKey};

use crate::error::VerificationError;

/// Our half of an unestablished ephemeral key agreement.
pub struct EphemeralKey(Sas);

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKey").field("public_key", &self.public_key_base64()).finish()
    }
}

impl EphemeralKey {
    /// Generate a fresh X25519 keypair for one verification attempt.
    pub fn generate() -> Self {
        Self(Sas::new())
    }

    /// Our ephemeral public key, unpadded base64.
    pub fn public_key_base64(&self) -> String {
        self.0.public_key().to_base64()
    }

    /// Complete the Diffie-Hellman agreement with the peer's ephemeral
    /// public key.
    ///
    /// Rejects the peer's point if it is equal to our own (a mirrored key,
    /// which would make the commitment trivially self-consistent) before
    /// ever handing it to the underlying X25519 implementation.
    pub fn agree(self, their_public_key_base64: &str) -> Result<SharedSecret, VerificationError> {
        if their_public_key_base64 == self.public_key_base64() {
            return Err(VerificationError::KeyMismatch);
        }

        let their_key = Curve25519PublicKey::from_base64(their_public_key_base64)
            .map_err(|_| VerificationError::KeyMismatch)?;

        self.0.diffie_hellman(their_key).map(SharedSecret).map_err(|_| VerificationError::KeyMismatch)
    }
}

/// The result of a completed key agreement: everything needed to derive SAS
/// bytes and MACs for the rest of the session.
pub struct SharedSecret(vodozemac::sas::EstablishedSas);

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

impl SharedSecret {
    /// Derive the 6 SAS bytes used for the emoji/decimal rendering.
    ///
    /// `info` must be the `MATRIX_KEY_VERIFICATION_SAS|...` string built by
    /// [`crate::sas::sas_info`].
    pub fn sas_bytes(&self, info: &str) -> vodozemac::sas::SasBytes {
        self.0.bytes(info)
    }

    /// HMAC-SHA-256 (via HKDF-derived key material) over `message`, using
    /// `info` as the HKDF/MAC context string. Returns unpadded base64.
    pub fn mac(&self, message: &str, info: &str) -> String {
        self.0.calculate_mac(message, info).to_base64()
    }
}

/// Generate a fresh 16-byte, hex-encoded transaction id.
pub fn generate_transaction_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The commitment a responder sends in `accept` and an initiator later opens
/// in `key`: `unpadded_base64(sha256(start_content_json || responder_public_key))`.
///
/// `start_content_json` must be the exact bytes being committed to: the
/// responder hashes the bytes it actually received on the wire (not a
/// re-serialization of its parsed form), and the initiator later hashes the
/// same canonical JSON it originally sent, so the two sides agree even if a
/// re-serialization would reorder whitespace differently than the sender's
/// JSON library did.
///
/// The ordering (content first, public key second) must match on both sides.
pub fn calculate_commitment(start_content_json: &str, responder_public_key_base64: &str) -> String {
    let digest = Sha256::new()
        .chain_update(start_content_json.as_bytes())
        .chain_update(responder_public_key_base64.as_bytes())
        .finalize();

    STANDARD_NO_PAD.encode(digest)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::StartContent;

    #[test]
    fn agreement_round_trips() {
        let alice = EphemeralKey::generate();
        let bob = EphemeralKey::generate();

        let alice_public = alice.public_key_base64();
        let bob_public = bob.public_key_base64();

        let alice_secret = alice.agree(&bob_public).unwrap();
        let bob_secret = bob.agree(&alice_public).unwrap();

        let info = "MATRIX_KEY_VERIFICATION_SAS|test";
        assert_eq!(
            alice_secret.sas_bytes(info).emoji_indices(),
            bob_secret.sas_bytes(info).emoji_indices()
        );
    }

    #[test]
    fn agree_with_own_key_is_rejected() {
        let alice = EphemeralKey::generate();
        let own_public = alice.public_key_base64();

        assert_eq!(alice.agree(&own_public), Err(VerificationError::KeyMismatch));
    }

    #[test]
    fn commitment_is_stable_for_the_same_inputs() {
        let start = StartContent::new(
            "DEVICEID".to_owned(),
            vec!["curve25519-hkdf-sha256".to_owned()],
            vec!["sha256".to_owned()],
            vec!["hkdf-hmac-sha256".to_owned()],
            vec!["emoji".to_owned(), "decimal".to_owned()],
        );
        let json = start.canonical_json();

        let a = calculate_commitment(&json, "Q/NmNFEUS1fS+YeEmiZkjjblKTitrKOAk7cPEumcMlg");
        let b = calculate_commitment(&json, "Q/NmNFEUS1fS+YeEmiZkjjblKTitrKOAk7cPEumcMlg");
        assert_eq!(a, b);

        let different = calculate_commitment(&json, "different_key_entirely");
        assert_ne!(a, different);
    }
}

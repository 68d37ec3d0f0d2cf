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

use std::fmt;

/// A device belonging to some user on the network, as handed to us by the
/// device directory.
///
/// This crate never looks devices up itself; the owning client resolves a
/// `(user_id, device_id)` pair to an `OlmDevice` before creating or accepting
/// a verification for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OlmDevice {
    user_id: String,
    device_id: String,
    ed25519: String,
    curve25519: String,
}

impl OlmDevice {
    /// Create a new device identity.
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        ed25519: impl Into<String>,
        curve25519: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            ed25519: ed25519.into(),
            curve25519: curve25519.into(),
        }
    }

    /// The owner of this device.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The device's own identifier, unique per user.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The device's long-term Ed25519 signing key, base64-encoded.
    pub fn ed25519_key(&self) -> &str {
        &self.ed25519
    }

    /// The device's Curve25519 identity key, base64-encoded.
    pub fn curve25519_key(&self) -> &str {
        &self.curve25519
    }

    /// The `algorithm:device_id` key id for this device's Ed25519 key, as
    /// used in `m.key.verification.mac` payloads.
    pub fn ed25519_key_id(&self) -> String {
        format!("ed25519:{}", self.device_id)
    }
}

impl fmt::Display for OlmDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.user_id, self.device_id)
    }
}

#[cfg(test)]
pub(crate) mod test_data {
    use super::OlmDevice;

    pub fn alice_device() -> OlmDevice {
        OlmDevice::new(
            "@alice:example.org",
            "JLAFKJWSCS",
            "alice_ed25519_fake_key_aaaaaaaaaaaaaaaaaaaaaaaaaa",
            "alice_curve25519_fake_key_aaaaaaaaaaaaaaaaaaaaaaaa",
        )
    }

    pub fn bob_device() -> OlmDevice {
        OlmDevice::new(
            "@bob:example.org",
            "JLAFKJWSRS",
            "bob_ed25519_fake_key_bbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "bob_curve25519_fake_key_bbbbbbbbbbbbbbbbbbbbbbbbbb",
        )
    }
}

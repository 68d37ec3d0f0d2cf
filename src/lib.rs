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

//! Short Authentication String (SAS) device verification.
//!
//! This crate is the state machine half of an interactive device
//! verification flow: two devices run a Diffie-Hellman key agreement over
//! an untrusted transport, derive a short human-checkable string from the
//! shared secret, and exchange MACs once the users confirm the strings
//! match out of band. It owns no socket and reads no clock directly outside
//! of [`time`]; the owning application is responsible for actually
//! delivering [`messages::OutgoingEnvelope`]s and for looking up
//! [`identities::OlmDevice`]s.
//!
//! [`manager::VerificationManager`] is the entry point most callers want:
//! it keys in-flight [`sas::SasSession`]s by transaction id and dispatches
//! inbound events to the right one. Callers who want to manage sessions
//! themselves can use [`sas::SasSession`] directly.

#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod error;
pub mod identities;
pub mod manager;
pub mod messages;
pub mod sas;
pub mod time;

pub use error::{LocalProtocolError, VerificationError};
pub use identities::OlmDevice;
pub use manager::VerificationManager;
pub use messages::{CancelCode, OutgoingEnvelope};
pub use sas::{SasSession, SasState};

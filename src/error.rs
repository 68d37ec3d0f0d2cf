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

use thiserror::Error;

use crate::messages::CancelCode;

/// A method was invoked on a [`SasSession`](crate::sas::SasSession) in a
/// state that doesn't permit it.
///
/// This error never escapes to the wire: it signals caller misuse and is
/// never the trigger for a `cancel` message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalProtocolError {
    /// `start_verification()` was called more than once on the same session.
    #[error("the verification flow has already been started")]
    AlreadyStarted,

    /// A method that requires an already-started session was called before
    /// `start_verification()`/`from_start()` ran.
    #[error("the verification flow has not been started yet")]
    NotStarted,

    /// `accept_verification()` was called on a session that isn't in the
    /// `Started` state, or was already accepted.
    #[error("the verification flow is not in a state that can be accepted")]
    CannotAccept,

    /// `receive_key()` was called before the accept step completed (or twice).
    #[error("the verification flow is not waiting for a key event")]
    UnexpectedKey,

    /// `accept_sas()`/`get_mac()` was called before both ephemeral keys were
    /// exchanged.
    #[error("the short authentication string hasn't been computed yet")]
    SasNotReady,

    /// `get_mac()` was called without a prior `accept_sas()`.
    #[error("the user has not confirmed the short authentication string yet")]
    SasNotAccepted,

    /// Any protocol-emitting method was called on a session that has already
    /// reached a terminal state.
    #[error("the verification flow has already been cancelled")]
    AlreadyCancelled,

    /// Any protocol-emitting method was called on a session that has already
    /// verified the peer device.
    #[error("the verification flow has already finished")]
    AlreadyDone,
}

/// Errors produced while validating an inbound protocol message.
///
/// Unlike [`LocalProtocolError`], each of these maps directly onto a
/// [`CancelCode`] and results in an outgoing `cancel` message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationError {
    /// The peer didn't pick one of our advertised options, or advertised
    /// `method` isn't `m.sas.v1`.
    #[error("the peer selected an unsupported verification method")]
    UnknownMethod,

    /// A message arrived that the current state doesn't permit (includes
    /// duplicate `accept`s and messages after cancellation).
    #[error("received a message that is unexpected in the current state")]
    UnexpectedMessage,

    /// The commitment didn't open correctly, or a MAC didn't match.
    #[error("the computed key material doesn't match what the peer committed to")]
    KeyMismatch,

    /// The event's sender doesn't match the device this session is verifying.
    #[error("the message was sent by a different user than expected")]
    UserMismatch,

    /// A payload failed to parse into its expected shape.
    #[error("the message could not be parsed")]
    InvalidMessage,

    /// Either timeout elapsed.
    #[error("the verification flow timed out")]
    Timeout,
}

impl VerificationError {
    /// The [`CancelCode`] that an outgoing `cancel` for this error carries.
    pub fn cancel_code(self) -> CancelCode {
        match self {
            VerificationError::UnknownMethod => CancelCode::UnknownMethod,
            VerificationError::UnexpectedMessage => CancelCode::UnexpectedMessage,
            VerificationError::KeyMismatch => CancelCode::KeyMismatch,
            VerificationError::UserMismatch => CancelCode::UserMismatch,
            VerificationError::InvalidMessage => CancelCode::InvalidMessage,
            VerificationError::Timeout => CancelCode::Timeout,
        }
    }
}

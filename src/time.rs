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

//! The only place in this crate that is allowed to look at the wall clock.
//!
//! [`SasSession`](crate::sas::SasSession) ages itself by comparing
//! `creation_time`/`last_event_time` fields against [`now()`]. Tests don't
//! sleep to exercise timeouts; they rewind those fields by subtracting a
//! [`Duration`] instead.

use std::time::{Duration, Instant};

/// The session is considered stale after this much time has passed since it
/// was created, regardless of how much protocol progress it has made.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// The session is considered stale if this much time passes between two
/// inbound protocol events.
pub const EVENT_MAX_AGE: Duration = Duration::from_secs(60);

/// A terminal session is swept out of the manager's table once it has been
/// terminal for this long.
pub const SESSION_GC_AGE: Duration = Duration::from_secs(20 * 60);

/// A monotonic timestamp, re-exported so the rest of the crate never has to
/// import [`std::time::Instant`] directly.
pub type Timestamp = Instant;

/// Returns the current instant.
///
/// This is the single seam tests use to age a session: construct it, then
/// move `creation_time`/`last_event_time` backwards by subtracting a
/// [`Duration`].
pub fn now() -> Timestamp {
    Instant::now()
}

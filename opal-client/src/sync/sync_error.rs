/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Synchronization errors.

use std::error::Error;
use std::fmt;

/// Cause of error.
#[derive(Debug)]
pub enum SyncErrorKind {
    /// General failure. See message for details.
    Unspecified,
    /// Server or backbone connectivity failure. Retried with backoff.
    Transport,
    /// The policy store rejected or never received an operation.
    StoreFailure,
    /// A received message did not parse or failed schema expectations.
    MalformedMessage,
    /// The server rejected the client's credentials.
    AuthenticationFailure,
    /// Missing or contradictory configuration.
    Configuration,
}

impl SyncErrorKind {
    /// Create a new instance with an error message.
    pub fn error_with_msg<S: AsRef<str>>(self, msg: S) -> SyncError {
        SyncError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
        }
    }

    /// Create a new instance without an error message.
    pub fn error(self) -> SyncError {
        SyncError {
            kind: self,
            msg: None,
        }
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/** Synchronization error.

Create a new instance via [SyncErrorKind].
*/
#[derive(Debug)]
pub struct SyncError {
    kind: SyncErrorKind,
    msg: Option<String>,
}

impl SyncError {
    /// Return the type of error.
    pub fn kind(&self) -> &SyncErrorKind {
        &self.kind
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(msg) = &self.msg {
            write!(f, "{} {}", self.kind, msg)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl Error for SyncError {}

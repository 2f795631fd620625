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

//! Server errors.

use std::error::Error;
use std::fmt;

/// Cause of error.
#[derive(Debug)]
pub enum ServerErrorKind {
    /// General failure. See message for details.
    Unspecified,
    /// Malformed identifier. E.g. topic or scope id.
    MalformedIdentifier,
    /// The tracked policy source failed (clone, fetch, bundle download).
    SourceFailure,
    /// A bundle could not be produced for the requested revision range.
    BundleFailure,
    /// Authentication failed.
    AuthenticationFailure,
    /// Unauthorized.
    Unauthorized,
    /// A webhook request failed secret validation.
    WebhookRejected,
    /// The requested scope does not exist.
    ScopeNotFound,
    /// Missing or contradictory configuration.
    Configuration,
}

impl ServerErrorKind {
    /// Create a new instance with an error message.
    pub fn error_with_msg<S: AsRef<str>>(self, msg: S) -> ServerError {
        ServerError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
        }
    }

    /// Create a new instance without an error message.
    pub fn error(self) -> ServerError {
        ServerError {
            kind: self,
            msg: None,
        }
    }
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/** Server error.

Create a new instance via [ServerErrorKind].
*/
#[derive(Debug)]
pub struct ServerError {
    kind: ServerErrorKind,
    msg: Option<String>,
}

impl ServerError {
    /// Return the type of error.
    pub fn kind(&self) -> &ServerErrorKind {
        &self.kind
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(msg) = &self.msg {
            write!(f, "{} {}", self.kind, msg)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl AsRef<ServerError> for ServerError {
    fn as_ref(&self) -> &ServerError {
        self
    }
}

impl Error for ServerError {}

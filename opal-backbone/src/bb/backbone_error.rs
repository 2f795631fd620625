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

//! Backbone errors.

use std::error::Error;
use std::fmt;

/// Cause of error.
#[derive(Debug)]
pub enum BackboneErrorKind {
    /// General failure. See message for details.
    Unspecified,
    /// The backbone connection is gone and could not be re-established yet.
    Disconnected,
    /// A message could not be published.
    PublishFailure,
    /// A channel subscription could not be established.
    SubscribeFailure,
}

impl BackboneErrorKind {
    /// Create a new instance with an error message.
    pub fn error_with_msg<S: AsRef<str>>(self, msg: S) -> BackboneError {
        BackboneError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
        }
    }

    /// Create a new instance without an error message.
    pub fn error(self) -> BackboneError {
        BackboneError {
            kind: self,
            msg: None,
        }
    }
}

impl fmt::Display for BackboneErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/** Backbone error.

Create a new instance via [BackboneErrorKind].
*/
#[derive(Debug)]
pub struct BackboneError {
    kind: BackboneErrorKind,
    msg: Option<String>,
}

impl BackboneError {
    /// Return the type of error.
    pub fn kind(&self) -> &BackboneErrorKind {
        &self.kind
    }
}

impl fmt::Display for BackboneError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(msg) = &self.msg {
            write!(f, "{} {}", self.kind, msg)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl Error for BackboneError {}

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

//! Fetch engine errors.

use std::error::Error;
use std::fmt;

/// Cause of error.
#[derive(Debug)]
pub enum FetchErrorKind {
    /// General failure. See message for details.
    Unspecified,
    /// No registered provider matches the directive.
    NoProvider,
    /// The remote source could not be reached or answered with an error.
    SourceFailure,
    /// Post-processing of the fetched payload failed.
    ProcessingFailure,
    /// The fetch did not finish within the configured timeout.
    Timeout,
    /// The engine input queue stayed full past the enqueue timeout.
    QueueFull,
}

impl FetchErrorKind {
    /// Create a new instance with an error message.
    pub fn error_with_msg<S: AsRef<str>>(self, msg: S) -> FetchError {
        FetchError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
        }
    }

    /// Create a new instance without an error message.
    pub fn error(self) -> FetchError {
        FetchError {
            kind: self,
            msg: None,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/** Fetch engine error.

Create a new instance via [FetchErrorKind].
*/
#[derive(Debug)]
pub struct FetchError {
    kind: FetchErrorKind,
    msg: Option<String>,
}

impl FetchError {
    /// Return the type of error.
    pub fn kind(&self) -> &FetchErrorKind {
        &self.kind
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(msg) = &self.msg {
            write!(f, "{} {}", self.kind, msg)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl Error for FetchError {}

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

//! Verified peer identity.

use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

/// What a verified peer is allowed to do.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// Connects to the hub and pulls bundles.
    Client,
    /// Publishes data updates.
    Datasource,
}

/// A verified peer: the subject and kind extracted from a validated JWT (or
/// granted by an open gate).
#[derive(Clone, Debug)]
pub struct PeerIdentity {
    kind: PeerKind,
    sub: String,
}

impl PeerIdentity {
    /// Return a new instance.
    pub fn new(kind: PeerKind, sub: &str) -> Self {
        Self {
            kind,
            sub: sub.to_owned(),
        }
    }

    /// The peer kind.
    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// The peer's subject, used in logs and statistics.
    pub fn identity_string(&self) -> &str {
        &self.sub
    }
}

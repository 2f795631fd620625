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

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod authentication {
    //! Client credentials towards the OPAL server.

    mod client_credentials;

    pub use self::client_credentials::ClientCredentials;
}
pub mod conf;
pub mod fetch;
pub mod msg;
pub mod rest_api;
pub mod store;
pub mod sync;
pub mod time;
pub mod util {
    //! Utilities

    mod backoff;
    mod signal_awaiter;

    pub use self::backoff::*;
    pub use self::signal_awaiter::*;
}

pub use self::conf::ClientConfig;
pub use self::sync::SyncEngine;

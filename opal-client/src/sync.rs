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

//! Client-side synchronization engine.

mod callback_reporter;
mod engine_state;
mod server_connection;
mod store_backup;
mod sync_engine;
mod sync_error;
mod transaction_log;

pub use self::callback_reporter::CallbackReporter;
pub use self::engine_state::EngineState;
pub use self::engine_state::EngineStateHolder;
pub use self::server_connection::ServerConnection;
pub use self::store_backup::BackupService;
pub use self::sync_engine::SyncEngine;
pub use self::sync_error::SyncError;
pub use self::sync_error::SyncErrorKind;
pub use self::transaction_log::Transaction;
pub use self::transaction_log::TransactionKind;
pub use self::transaction_log::TransactionLog;

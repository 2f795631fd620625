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

//! Wire message types shared between server and client.

mod bundle;
mod data_update;
mod hub_message;

pub use self::bundle::DataModule;
pub use self::bundle::PolicyBundle;
pub use self::bundle::PolicyModule;
pub use self::bundle::PolicyRevisionEvent;
pub use self::bundle::policy_topic_for_dir;
pub use self::data_update::DEFAULT_DATA_TOPIC;
pub use self::data_update::DataSourceConfig;
pub use self::data_update::DataSourceEntry;
pub use self::data_update::DataUpdate;
pub use self::data_update::SaveMethod;
pub use self::data_update::UpdateCallback;
pub use self::data_update::UpdateReport;
pub use self::hub_message::HubCommand;
pub use self::hub_message::HubRequest;
pub use self::hub_message::WELCOME_TOPIC;

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

//! Parsing of configuration for the data-fetch engine.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ClientConfigDefaults;

/// Configuration for the data-fetch engine.
#[derive(Debug, Deserialize, Serialize)]
pub struct FetchConfig {
    /// See [Self::worker_count()].
    workercount: usize,
    /// See [Self::queue_size()].
    queuesize: usize,
    /// See [Self::fetch_timeout_seconds()].
    fetchtimeoutseconds: u64,
    /// See [Self::enqueue_timeout_seconds()].
    enqueuetimeoutseconds: u64,
}

impl ClientConfigDefaults for FetchConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "workercount", "6")
            .unwrap()
            .set_default(prefix.to_string() + "." + "queuesize", "64")
            .unwrap()
            .set_default(prefix.to_string() + "." + "fetchtimeoutseconds", "30")
            .unwrap()
            .set_default(prefix.to_string() + "." + "enqueuetimeoutseconds", "10")
            .unwrap()
    }
}

impl FetchConfig {
    /// Number of concurrent fetch workers. Defaults to 6.
    pub fn worker_count(&self) -> usize {
        self.workercount.max(1)
    }

    /// Bounded size of the fetch input queue. Enqueueing blocks (with
    /// timeout) when full.
    pub fn queue_size(&self) -> usize {
        self.queuesize.max(1)
    }

    /// Timeout for a single fetch. Defaults to 30 seconds.
    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetchtimeoutseconds.max(1)
    }

    /// Timeout for enqueueing a directive when the queue is full.
    pub fn enqueue_timeout_seconds(&self) -> u64 {
        self.enqueuetimeoutseconds.max(1)
    }
}

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

//! Tracking of the upstream policy source.

mod bundle_policy_source;
mod git_policy_source;
mod leader_lock;
mod policy_source;
mod policy_source_tracker;
mod webhook_validator;

pub use self::bundle_policy_source::BundlePolicySource;
pub use self::git_policy_source::GitPolicySource;
pub use self::leader_lock::LeaderLock;
pub use self::policy_source::PolicySourceView;
pub use self::policy_source::RevisionChange;
pub use self::policy_source::SourceDiff;
pub use self::policy_source::TrackedPolicySource;
pub use self::policy_source_tracker::PolicySourceTracker;
pub use self::webhook_validator::WebhookValidator;

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

//! Sync engine state machine states.

use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

/// The sync engine's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Loading identity and local state.
    Init = 0,
    /// Trying to open the server connection.
    Connecting = 1,
    /// Connection open, applying the initial bundle and base data config.
    Bootstrapping = 2,
    /// Fully synchronized, processing topic events.
    Connected = 3,
    /// Server unreachable, reconnecting with backoff.
    Degraded = 4,
    /// Shut down, final backup flushed.
    Stopped = 5,
}

impl From<u8> for EngineState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Connecting,
            2 => Self::Bootstrapping,
            3 => Self::Connected,
            4 => Self::Degraded,
            _ => Self::Stopped,
        }
    }
}

/// Thread safe holder of the current [EngineState].
pub struct EngineStateHolder {
    state: AtomicU8,
}

impl EngineStateHolder {
    /// Return a new instance in [EngineState::Init].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Init as u8),
        }
    }

    /// Return the current state.
    pub fn get(&self) -> EngineState {
        EngineState::from(self.state.load(Ordering::Relaxed))
    }

    /// Transition to a new state. [EngineState::Stopped] is terminal.
    pub fn set(&self, state: EngineState) {
        if self.get() == EngineState::Stopped {
            return;
        }
        let previous = EngineState::from(self.state.swap(state as u8, Ordering::Relaxed));
        if previous != state {
            log::info!("Sync engine state: {previous:?} -> {state:?}");
        }
    }
}

impl Default for EngineStateHolder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_is_terminal() {
        let holder = EngineStateHolder::new();
        assert_eq!(holder.get(), EngineState::Init);
        holder.set(EngineState::Connected);
        assert_eq!(holder.get(), EngineState::Connected);
        holder.set(EngineState::Stopped);
        holder.set(EngineState::Connecting);
        assert_eq!(holder.get(), EngineState::Stopped);
    }
}

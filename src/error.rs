// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types.
//!
//! Only caller contract violations and hard I/O failures surface here.
//! Malformed lines, lost links and failed pairing attempts are absorbed by
//! the engine and reported through logging and events instead.

use thiserror::Error;

/// Library error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("worker '{0}' is already started")]
    WorkerAlreadyStarted(String),

    #[error("worker '{0}' is already stopped")]
    WorkerAlreadyStopped(String),

    #[error("worker '{0}' is not running")]
    WorkerNotRunning(String),

    #[error("worker '{0}' is not suspended")]
    WorkerNotSuspended(String),

    #[error("watchdog cannot be enabled without a unique device id")]
    WatchdogWithoutDeviceId,

    #[error("invalid separator configuration: {0}")]
    InvalidSeparators(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Library result alias.
pub type Result<T> = std::result::Result<T, Error>;

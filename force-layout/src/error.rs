// Copyright 2025 John Brosnihan
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
//! Error types
//!
//! Two families of errors exist. [`LayoutError`] covers everything that can go
//! wrong while configuring or starting a simulation and is returned
//! synchronously. [`TaskError`] is the failure half of a task's result and is
//! only ever observed through a [`TaskHandle`](crate::worker::TaskHandle).

use crate::engine::BodyId;
use thiserror::Error;

/// Errors raised while configuring or starting a layout
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    /// A parameter is outside its valid range
    #[error("invalid configuration for `{field}`: {reason}")]
    Configuration {
        /// Name of the offending parameter
        field: &'static str,
        /// Human readable explanation
        reason: String,
    },

    /// Both the pool and its overflow budget are exhausted
    #[error("allocation exhausted for {kind}: {in_use} objects in use (limit {limit})")]
    AllocationExhausted {
        /// Kind of pooled object
        kind: &'static str,
        /// Objects outstanding when the limit was hit
        in_use: usize,
        /// Configured limit, including the overflow budget
        limit: usize,
    },

    /// Cross-thread shared memory cannot be provided on this target
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// A link or an interactive update referenced an id that is not in the body list
    #[error("unknown body {0}")]
    UnknownBody(BodyId),

    /// The same body id appears twice in the body list
    #[error("duplicate body {0}")]
    DuplicateBody(BodyId),

    /// Parent/child edges contain a cycle
    #[error("cycle detected in hierarchy involving {0}")]
    CycleDetected(BodyId),

    /// The worker pool could not be created or is shut down
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl LayoutError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        LayoutError::Configuration {
            field,
            reason: reason.into(),
        }
    }
}

/// Reasons a submitted task resolved as failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The worker running the task panicked
    #[error("worker {worker} faulted: {message}")]
    WorkerFault {
        /// Name of the faulted worker
        worker: String,
        /// Panic payload, when it was a string
        message: String,
    },

    /// The task's deadline passed before it produced a result
    #[error("task {0} timed out")]
    Timeout(u64),

    /// The pool refused the submission
    #[error("task rejected: {0}")]
    Rejected(String),

    /// The payload itself returned an error
    #[error("task failed: {0}")]
    Failed(String),

    /// The pool was shut down before the task ran
    #[error("task {0} cancelled")]
    Cancelled(u64),

    /// No healthy worker exists for the requested category
    #[error("no healthy worker available for {0}")]
    NoHealthyWorker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message() {
        let err = LayoutError::config("theta", "must be in (0, 1]");
        assert_eq!(
            err.to_string(),
            "invalid configuration for `theta`: must be in (0, 1]"
        );
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::Timeout(7);
        assert_eq!(err.to_string(), "task 7 timed out");

        let fault = TaskError::WorkerFault {
            worker: "layout-0".to_string(),
            message: "boom".to_string(),
        };
        assert!(fault.to_string().contains("layout-0"));
    }
}

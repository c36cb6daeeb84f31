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
//! Adaptive theta control
//!
//! Watches tick durations and trades accuracy for speed when ticks run over
//! budget. The controller only ever changes theta by one bounded step per
//! evaluation window, and waits `min_interval` ticks between adjustments.

use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Tuning of the adaptive controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Target tick duration in milliseconds
    pub budget_ms: f64,
    /// Tolerance around the budget, as a fraction of it
    pub margin: f64,
    /// Theta change per adjustment
    pub step: f64,
    /// Lowest theta the controller will choose
    pub floor: f64,
    /// Highest theta the controller will choose
    pub ceiling: f64,
    /// Samples per evaluation window
    pub window: usize,
    /// Minimum ticks between two adjustments
    pub min_interval: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            budget_ms: 16.0,
            margin: 0.2,
            step: 0.05,
            floor: 0.3,
            ceiling: 1.0,
            window: 10,
            min_interval: 30,
        }
    }
}

impl ControllerConfig {
    /// Create a config targeting `budget`
    pub fn with_budget(budget: Duration) -> Self {
        ControllerConfig {
            budget_ms: budget.as_secs_f64() * 1000.0,
            ..Default::default()
        }
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), LayoutError> {
        if !(self.budget_ms.is_finite() && self.budget_ms > 0.0) {
            return Err(LayoutError::config("budget_ms", "must be positive and finite"));
        }
        if !(0.0..1.0).contains(&self.margin) {
            return Err(LayoutError::config("margin", "must be in [0, 1)"));
        }
        if !(self.step > 0.0 && self.step <= 1.0) {
            return Err(LayoutError::config("step", "must be in (0, 1]"));
        }
        if !(self.floor > 0.0 && self.floor <= self.ceiling && self.ceiling <= 1.0) {
            return Err(LayoutError::config(
                "floor",
                format!(
                    "need 0 < floor <= ceiling <= 1, got floor {} ceiling {}",
                    self.floor, self.ceiling
                ),
            ));
        }
        if self.window == 0 {
            return Err(LayoutError::config("window", "must be at least 1"));
        }
        Ok(())
    }
}

/// Rolling-window theta controller
///
/// # Example
///
/// ```
/// use force_layout::controller::{AdaptiveController, ControllerConfig};
/// use std::time::Duration;
///
/// let config = ControllerConfig {
///     window: 2,
///     min_interval: 0,
///     ..ControllerConfig::with_budget(Duration::from_millis(10))
/// };
/// let mut controller = AdaptiveController::new(config, 0.5).unwrap();
///
/// assert_eq!(controller.record(Duration::from_millis(40)), None);
/// let theta = controller.record(Duration::from_millis(40)).unwrap();
/// assert!(theta > 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    config: ControllerConfig,
    theta: f64,
    samples: VecDeque<Duration>,
    since_evaluation: usize,
    since_adjustment: u32,
    adjustments: u64,
}

impl AdaptiveController {
    /// Create a controller starting from `theta`, clamped into `[floor, ceiling]`
    pub fn new(config: ControllerConfig, theta: f64) -> Result<Self, LayoutError> {
        config.validate()?;
        let theta = theta.clamp(config.floor, config.ceiling);
        Ok(AdaptiveController {
            samples: VecDeque::with_capacity(config.window),
            // The first window may adjust immediately
            since_adjustment: config.min_interval,
            config,
            theta,
            since_evaluation: 0,
            adjustments: 0,
        })
    }

    /// Record one tick duration
    ///
    /// Returns the new theta when this sample completes a window that
    /// triggers an adjustment.
    pub fn record(&mut self, duration: Duration) -> Option<f64> {
        if self.samples.len() == self.config.window {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
        self.since_evaluation += 1;
        self.since_adjustment = self.since_adjustment.saturating_add(1);

        if self.since_evaluation < self.config.window {
            return None;
        }
        self.since_evaluation = 0;
        if self.since_adjustment < self.config.min_interval {
            return None;
        }

        let average_ms = self.average().as_secs_f64() * 1000.0;
        let budget = self.config.budget_ms;
        let next = if average_ms > budget * (1.0 + self.config.margin) {
            (self.theta + self.config.step).min(self.config.ceiling)
        } else if average_ms < budget * (1.0 - self.config.margin) {
            (self.theta - self.config.step).max(self.config.floor)
        } else {
            self.theta
        };

        if next == self.theta {
            return None;
        }
        debug!(from = self.theta, to = next, average_ms, budget, "adjusting theta");
        self.theta = next;
        self.since_adjustment = 0;
        self.adjustments += 1;
        // Samples taken under the old theta say nothing about the new one
        self.samples.clear();
        Some(next)
    }

    /// Mean of the samples currently in the window
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    /// Current theta
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Override theta, clamped into `[floor, ceiling]`, and restart the window
    pub fn set_theta(&mut self, theta: f64) {
        self.theta = theta.clamp(self.config.floor, self.config.ceiling);
        self.samples.clear();
        self.since_evaluation = 0;
    }

    /// Number of adjustments made so far
    pub fn adjustments(&self) -> u64 {
        self.adjustments
    }

    /// Active configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}

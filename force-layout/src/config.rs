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
//! Simulation parameters and execution settings
//!
//! Every struct here deserializes with `#[serde(default)]`, so a config file
//! only needs to name the fields it changes:
//!
//! ```
//! use force_layout::config::SimulationParams;
//!
//! let params: SimulationParams = serde_json::from_str(r#"{ "theta": 0.5 }"#).unwrap();
//! assert_eq!(params.theta, 0.5);
//! assert_eq!(params.max_ticks, SimulationParams::default().max_ticks);
//! params.validate().unwrap();
//! ```

use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How repulsion between bodies is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceMode {
    /// Octree approximation controlled by `theta`
    #[default]
    BarnesHut,
    /// Exact pairwise sum, for verification runs
    Exact,
}

/// Where a simulation's ticks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On the caller's thread, one tick per call
    #[default]
    Inline,
    /// On one dedicated background thread
    Background,
    /// Fanned out over a pool of worker threads sharing one buffer
    Pooled {
        /// Number of layout workers
        threads: usize,
    },
}

/// Numeric parameters of the force layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Scale of body-body repulsion
    pub repulsion_strength: f64,
    /// Default spring strength for links without their own
    pub spring_strength: f64,
    /// Fraction of velocity removed each tick
    pub damping: f64,
    /// Pull of every body toward the origin
    pub centering_strength: f64,
    /// Barnes-Hut opening threshold, in `(0, 1]`
    pub theta: f64,
    /// Integration step
    pub time_step: f64,
    /// Lower clamp on separation distance
    pub min_distance: f64,
    /// Upper clamp on separation distance
    pub max_distance: f64,
    /// Hard cap on the number of ticks in a run
    pub max_ticks: u32,
    /// Geometric decay of alpha per tick
    pub alpha_decay: f64,
    /// Alpha below which the layout counts as converged
    pub alpha_min: f64,
    /// Alpha at the start of a run
    pub initial_alpha: f64,
    /// Speed clamp applied after integration
    pub max_speed: f64,
    /// Repulsion evaluation strategy
    pub force_mode: ForceMode,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            repulsion_strength: 1000.0,
            spring_strength: 0.5,
            damping: 0.4,
            centering_strength: 0.01,
            theta: 0.8,
            time_step: 1.0,
            min_distance: 1.0,
            max_distance: 10_000.0,
            max_ticks: 300,
            // Reaches the default alpha_min after roughly 300 ticks
            alpha_decay: 0.0228,
            alpha_min: 0.001,
            initial_alpha: 1.0,
            max_speed: 50.0,
            force_mode: ForceMode::BarnesHut,
        }
    }
}

impl SimulationParams {
    /// Set the opening threshold
    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Set the tick cap
    pub fn with_max_ticks(mut self, max_ticks: u32) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Set the force evaluation strategy
    pub fn with_force_mode(mut self, mode: ForceMode) -> Self {
        self.force_mode = mode;
        self
    }

    /// Check every parameter, returning the first one out of range
    pub fn validate(&self) -> Result<(), LayoutError> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(LayoutError::config(
                "time_step",
                format!("must be positive and finite, got {}", self.time_step),
            ));
        }
        validate_theta(self.theta)?;
        non_negative("repulsion_strength", self.repulsion_strength)?;
        non_negative("spring_strength", self.spring_strength)?;
        non_negative("centering_strength", self.centering_strength)?;
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(LayoutError::config(
                "damping",
                format!("must be in [0, 1], got {}", self.damping),
            ));
        }
        if !(self.min_distance.is_finite() && self.min_distance > 0.0) {
            return Err(LayoutError::config(
                "min_distance",
                format!("must be positive and finite, got {}", self.min_distance),
            ));
        }
        if self.max_distance.is_nan() || self.max_distance < self.min_distance {
            return Err(LayoutError::config(
                "max_distance",
                format!(
                    "must be at least min_distance ({}), got {}",
                    self.min_distance, self.max_distance
                ),
            ));
        }
        if self.max_ticks == 0 {
            return Err(LayoutError::config("max_ticks", "must be at least 1"));
        }
        if !(self.alpha_decay > 0.0 && self.alpha_decay < 1.0) {
            return Err(LayoutError::config(
                "alpha_decay",
                format!("must be in (0, 1), got {}", self.alpha_decay),
            ));
        }
        if !(self.alpha_min.is_finite() && self.alpha_min >= 0.0) {
            return Err(LayoutError::config(
                "alpha_min",
                format!("must be non-negative and finite, got {}", self.alpha_min),
            ));
        }
        if !(self.initial_alpha.is_finite() && self.initial_alpha > 0.0) {
            return Err(LayoutError::config(
                "initial_alpha",
                format!("must be positive and finite, got {}", self.initial_alpha),
            ));
        }
        if self.max_speed.is_nan() || self.max_speed <= 0.0 {
            return Err(LayoutError::config(
                "max_speed",
                format!("must be positive, got {}", self.max_speed),
            ));
        }
        Ok(())
    }
}

/// Check an opening threshold on its own
pub fn validate_theta(theta: f64) -> Result<(), LayoutError> {
    if theta > 0.0 && theta <= 1.0 {
        Ok(())
    } else {
        Err(LayoutError::config(
            "theta",
            format!("must be in (0, 1], got {}", theta),
        ))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), LayoutError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(LayoutError::config(
            field,
            format!("must be non-negative and finite, got {}", value),
        ))
    }
}

/// A number that is either fixed or derived from an item
///
/// Computed parameters are evaluated once per tick for every item, never
/// per field access.
///
/// ```
/// use force_layout::config::Parameter;
///
/// let fixed: Parameter<u32> = Parameter::Constant(2.0);
/// let scaled = Parameter::computed(|n: &u32| *n as f64 * 0.5);
/// assert_eq!(fixed.resolve(&10), 2.0);
/// assert_eq!(scaled.resolve(&10), 5.0);
/// ```
pub enum Parameter<T> {
    /// Same value for every item
    Constant(f64),
    /// Value computed from each item
    Computed(Arc<dyn Fn(&T) -> f64 + Send + Sync>),
}

impl<T> Parameter<T> {
    /// Wrap a closure as a computed parameter
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        Parameter::Computed(Arc::new(f))
    }

    /// Value of the parameter for `item`
    pub fn resolve(&self, item: &T) -> f64 {
        match self {
            Parameter::Constant(v) => *v,
            Parameter::Computed(f) => f(item),
        }
    }

    /// Check if the parameter is a constant
    pub fn is_constant(&self) -> bool {
        matches!(self, Parameter::Constant(_))
    }
}

impl<T> Clone for Parameter<T> {
    fn clone(&self) -> Self {
        match self {
            Parameter::Constant(v) => Parameter::Constant(*v),
            Parameter::Computed(f) => Parameter::Computed(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Parameter::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl<T> From<f64> for Parameter<T> {
    fn from(value: f64) -> Self {
        Parameter::Constant(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        SimulationParams::default().validate().unwrap();
    }

    #[test]
    fn test_time_step_must_be_positive() {
        for dt in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let params = SimulationParams {
                time_step: dt,
                ..SimulationParams::default()
            };
            match params.validate() {
                Err(LayoutError::Configuration { field, .. }) => assert_eq!(field, "time_step"),
                other => panic!("expected time_step error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_theta_range() {
        assert!(validate_theta(1.0).is_ok());
        assert!(validate_theta(0.01).is_ok());
        assert!(validate_theta(0.0).is_err());
        assert!(validate_theta(1.01).is_err());
        assert!(validate_theta(f64::NAN).is_err());
    }

    #[test]
    fn test_distance_bounds() {
        let params = SimulationParams {
            min_distance: 5.0,
            max_distance: 1.0,
            ..SimulationParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(LayoutError::Configuration { field: "max_distance", .. })
        ));
    }

    #[test]
    fn test_partial_json() {
        let params: SimulationParams =
            serde_json::from_str(r#"{"damping": 0.2, "force_mode": "exact"}"#).unwrap();
        assert_eq!(params.damping, 0.2);
        assert_eq!(params.force_mode, ForceMode::Exact);
        assert_eq!(params.theta, SimulationParams::default().theta);
    }

    #[test]
    fn test_execution_mode_json() {
        let mode: ExecutionMode = serde_json::from_str(r#"{"pooled": {"threads": 3}}"#).unwrap();
        assert_eq!(mode, ExecutionMode::Pooled { threads: 3 });
        let mode: ExecutionMode = serde_json::from_str(r#""background""#).unwrap();
        assert_eq!(mode, ExecutionMode::Background);
    }

    #[test]
    fn test_parameter_clone_shares_closure() {
        let p: Parameter<f64> = Parameter::computed(|x| x * 2.0);
        let q = p.clone();
        assert_eq!(q.resolve(&3.0), 6.0);
        assert!(!q.is_constant());
        assert_eq!(format!("{:?}", q), "Computed(..)");
        let c: Parameter<f64> = 1.5.into();
        assert!(c.is_constant());
    }
}

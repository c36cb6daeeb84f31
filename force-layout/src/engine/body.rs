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
//! Bodies and links as supplied by the caller

use crate::error::LayoutError;
use crate::math::{Axis, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default charge: negative, so bodies push each other apart
pub const DEFAULT_CHARGE: f64 = -1.0;

/// Default rest length of a link
pub const DEFAULT_REST_DISTANCE: f64 = 30.0;

/// Stable external identifier of a body
///
/// Ids are chosen by the caller and never reinterpreted. The engine maps them
/// to dense indices once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub u64);

impl BodyId {
    /// Raw id value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for BodyId {
    fn from(id: u64) -> Self {
        BodyId(id)
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-axis pins; `Some(v)` holds that coordinate at `v`
pub type Pin = [Option<f64>; 3];

/// A charged point in the layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// External id
    pub id: BodyId,
    /// Initial position
    pub position: Vec3,
    /// Initial velocity
    #[serde(default)]
    pub velocity: Vec3,
    /// Repulsion charge, finite and nonzero
    #[serde(default = "default_charge")]
    pub charge: f64,
    /// Pinned axes
    #[serde(default)]
    pub pin: Pin,
}

fn default_charge() -> f64 {
    DEFAULT_CHARGE
}

impl Body {
    /// Create a body at rest with the default charge
    pub fn new(id: impl Into<BodyId>, position: Vec3) -> Self {
        Body {
            id: id.into(),
            position,
            velocity: Vec3::ZERO,
            charge: DEFAULT_CHARGE,
            pin: [None; 3],
        }
    }

    /// Set the charge
    pub fn with_charge(mut self, charge: f64) -> Self {
        self.charge = charge;
        self
    }

    /// Set the initial velocity
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Pin one axis at `value`
    pub fn pinned(mut self, axis: Axis, value: f64) -> Self {
        self.pin[axis.index()] = Some(value);
        self
    }

    /// Pin all three axes at the current position
    pub fn fixed(mut self) -> Self {
        self.pin = [
            Some(self.position.x),
            Some(self.position.y),
            Some(self.position.z),
        ];
        self
    }

    /// Check if an axis is pinned
    pub fn is_pinned(&self, axis: Axis) -> bool {
        self.pin[axis.index()].is_some()
    }

    /// Check charge and coordinates
    pub fn validate(&self) -> Result<(), LayoutError> {
        if !self.charge.is_finite() || self.charge == 0.0 {
            return Err(LayoutError::config(
                "charge",
                format!("body {} has charge {}, must be finite and nonzero", self.id, self.charge),
            ));
        }
        if !self.position.is_finite() || !self.velocity.is_finite() {
            return Err(LayoutError::config(
                "position",
                format!("body {} has a non-finite position or velocity", self.id),
            ));
        }
        if self.pin.iter().flatten().any(|v| !v.is_finite()) {
            return Err(LayoutError::config(
                "pin",
                format!("body {} has a non-finite pin", self.id),
            ));
        }
        Ok(())
    }
}

/// Spring between two bodies
///
/// Links only feed the attraction term. Self-loops contribute nothing and
/// cycles are never walked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// One end
    pub source: BodyId,
    /// Other end
    pub target: BodyId,
    /// Length at which the spring exerts no force
    #[serde(default = "default_rest_distance")]
    pub rest_distance: f64,
    /// Spring strength; falls back to the simulation's `spring_strength`
    #[serde(default)]
    pub strength: Option<f64>,
}

fn default_rest_distance() -> f64 {
    DEFAULT_REST_DISTANCE
}

impl Link {
    /// Create a link with the default rest distance and strength
    pub fn new(source: impl Into<BodyId>, target: impl Into<BodyId>) -> Self {
        Link {
            source: source.into(),
            target: target.into(),
            rest_distance: DEFAULT_REST_DISTANCE,
            strength: None,
        }
    }

    /// Set the rest distance
    pub fn with_rest_distance(mut self, distance: f64) -> Self {
        self.rest_distance = distance;
        self
    }

    /// Set the spring strength
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    /// Check if both ends are the same body
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    pub(crate) fn validate(&self) -> Result<(), LayoutError> {
        if !(self.rest_distance.is_finite() && self.rest_distance >= 0.0) {
            return Err(LayoutError::config(
                "rest_distance",
                format!(
                    "link {} -> {} has rest distance {}",
                    self.source, self.target, self.rest_distance
                ),
            ));
        }
        if let Some(s) = self.strength {
            if !(s.is_finite() && s >= 0.0) {
                return Err(LayoutError::config(
                    "strength",
                    format!("link {} -> {} has strength {}", self.source, self.target, s),
                ));
            }
        }
        Ok(())
    }
}

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
//! Visibility queries over current positions
//!
//! The culling policy belongs to the renderer; this module only answers
//! "which bodies are inside this volume and close enough to the eye".

use crate::error::LayoutError;
use crate::math::{Aabb, Vec3};

/// Half-space `normal · p + offset >= 0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing into the kept half-space
    pub normal: Vec3,
    /// Signed offset from the origin
    pub offset: f64,
}

impl Plane {
    /// Plane through `point` with the given inward normal
    pub fn through(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Plane {
            normal,
            offset: -normal.dot(point),
        }
    }

    /// Signed distance of `p` from the plane, positive on the kept side
    pub fn signed_distance(&self, p: Vec3) -> f64 {
        self.normal.dot(p) + self.offset
    }
}

/// Six inward-facing planes bounding a view volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Frustum from explicit planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Frustum { planes }
    }

    /// Symmetric perspective frustum looking from `eye` toward `target`
    ///
    /// `fov_y` is the full vertical field of view in radians.
    pub fn perspective(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f64,
        aspect: f64,
        near: f64,
        far: f64,
    ) -> Result<Self, LayoutError> {
        if !(fov_y > 0.0 && fov_y < std::f64::consts::PI) {
            return Err(LayoutError::config("fov_y", format!("must be in (0, pi), got {}", fov_y)));
        }
        if !(aspect.is_finite() && aspect > 0.0) {
            return Err(LayoutError::config("aspect", format!("must be positive, got {}", aspect)));
        }
        if !(near > 0.0 && far > near) {
            return Err(LayoutError::config(
                "near",
                format!("need 0 < near < far, got near {} far {}", near, far),
            ));
        }

        let forward = (target - eye).normalize();
        let right = forward.cross(up).normalize();
        if forward == Vec3::ZERO || right == Vec3::ZERO {
            return Err(LayoutError::config(
                "up",
                "eye, target and up must define a view direction",
            ));
        }
        let true_up = right.cross(forward);

        let half_v = (fov_y * 0.5).tan();
        let half_h = half_v * aspect;

        let right_edge = forward + right * half_h;
        let left_edge = forward - right * half_h;
        let top_edge = forward + true_up * half_v;
        let bottom_edge = forward - true_up * half_v;

        Ok(Frustum::new([
            Plane::through(eye + forward * near, forward),
            Plane::through(eye + forward * far, -forward),
            Plane::through(eye, left_edge.cross(true_up)),
            Plane::through(eye, true_up.cross(right_edge)),
            Plane::through(eye, top_edge.cross(right)),
            Plane::through(eye, right.cross(bottom_edge)),
        ]))
    }

    /// Check if `p` is inside every plane
    pub fn contains(&self, p: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.signed_distance(p) >= 0.0)
    }

    /// The bounding planes
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }
}

/// Region a caller can see
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewVolume {
    /// Axis-aligned box
    Bounds(Aabb),
    /// Six-plane frustum
    Frustum(Frustum),
}

impl ViewVolume {
    /// Check if `p` is inside the volume
    pub fn contains(&self, p: Vec3) -> bool {
        match self {
            ViewVolume::Bounds(aabb) => aabb.contains(p),
            ViewVolume::Frustum(frustum) => frustum.contains(p),
        }
    }
}

impl From<Aabb> for ViewVolume {
    fn from(aabb: Aabb) -> Self {
        ViewVolume::Bounds(aabb)
    }
}

impl From<Frustum> for ViewVolume {
    fn from(frustum: Frustum) -> Self {
        ViewVolume::Frustum(frustum)
    }
}

/// Dense indices of positions inside `volume` and within `culling_distance` of `eye`
///
/// Non-finite positions are never visible. A negative or NaN distance
/// culls everything; `f64::INFINITY` disables distance culling.
///
/// ```
/// use force_layout::math::{Aabb, Vec3};
/// use force_layout::visibility::{visible_bodies, ViewVolume};
///
/// let positions = [Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), Vec3::new(50.0, 0.0, 0.0)];
/// let volume = ViewVolume::Bounds(Aabb::new(Vec3::new(-10.0, -10.0, -10.0), Vec3::new(10.0, 10.0, 10.0)));
///
/// assert_eq!(visible_bodies(&positions, &volume, Vec3::ZERO, f64::INFINITY), vec![0, 1]);
/// assert_eq!(visible_bodies(&positions, &volume, Vec3::ZERO, 1.0), vec![0]);
/// ```
pub fn visible_bodies(positions: &[Vec3], volume: &ViewVolume, eye: Vec3, culling_distance: f64) -> Vec<usize> {
    if culling_distance.is_nan() || culling_distance < 0.0 {
        return Vec::new();
    }
    let max_sq = culling_distance * culling_distance;
    positions
        .iter()
        .enumerate()
        .filter(|(_, &p)| p.is_finite() && (p - eye).length_squared() <= max_sq && volume.contains(p))
        .map(|(i, _)| i)
        .collect()
}

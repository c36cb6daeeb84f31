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
//! Cross-thread body field buffer
//!
//! # Memory Layout
//!
//! Each body occupies a fixed-stride record of nine `f32` fields:
//!
//! ```text
//! index 0: [px py pz | vx vy vz | fx fy fz]
//! index 1: [px py pz | vx vy vz | fx fy fz]
//! ...
//! ```
//!
//! Fields are stored as `AtomicU32` holding the float's bit pattern, so a
//! single field can be written and read from any thread without locks and
//! without tearing. A whole vector is *not* written atomically: a reader
//! racing a writer may see the new `x` together with the old `y` and `z`.
//! Consumers must tolerate that one-tick inconsistency.

use crate::error::LayoutError;
use crate::math::{Axis, Vec3};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Number of `f32` fields per body record
pub const STRIDE: usize = 9;

/// Default upper bound on the size of a shared segment (256 MiB)
pub const DEFAULT_SHARED_LIMIT: usize = 256 * 1024 * 1024;

/// Reinterpret a float as its IEEE-754 bit pattern
pub fn float_to_bits(value: f32) -> u32 {
    value.to_bits()
}

/// Reinterpret an IEEE-754 bit pattern as a float
pub fn bits_to_float(bits: u32) -> f32 {
    f32::from_bits(bits)
}

/// One of the three vector fields in a body record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Position
    Position,
    /// Velocity
    Velocity,
    /// Accumulated force
    Force,
}

impl Field {
    /// Offset of the field's first component inside a record
    pub fn offset(self) -> usize {
        match self {
            Field::Position => 0,
            Field::Velocity => 3,
            Field::Force => 6,
        }
    }
}

/// Shared, fixed-size buffer of per-body fields
///
/// Cloning is cheap and yields another handle onto the same memory.
///
/// # Example
///
/// ```
/// use force_layout::buffer::{Field, SharedBuffer};
/// use force_layout::math::{Axis, Vec3};
///
/// let buffer = SharedBuffer::try_new(2).unwrap();
/// let writer = buffer.clone();
/// std::thread::spawn(move || writer.store_vec3(1, Field::Position, Vec3::new(1.0, 2.0, 3.0)))
///     .join()
///     .unwrap();
///
/// assert_eq!(buffer.load(1, Field::Position, Axis::Y), 2.0);
/// ```
#[derive(Clone)]
pub struct SharedBuffer {
    data: Arc<[AtomicU32]>,
    bodies: usize,
}

impl SharedBuffer {
    /// Whether this target provides the atomics the buffer needs
    pub fn is_supported() -> bool {
        cfg!(target_has_atomic = "32")
    }

    /// Allocate a zeroed buffer for `bodies` records
    pub fn try_new(bodies: usize) -> Result<Self, LayoutError> {
        Self::try_with_limit(bodies, DEFAULT_SHARED_LIMIT)
    }

    /// Allocate a zeroed buffer, refusing segments larger than `max_bytes`
    pub fn try_with_limit(bodies: usize, max_bytes: usize) -> Result<Self, LayoutError> {
        if !Self::is_supported() {
            return Err(LayoutError::UnsupportedEnvironment(
                "target lacks 32-bit atomics".to_string(),
            ));
        }
        let fields = bodies
            .checked_mul(STRIDE)
            .ok_or_else(|| LayoutError::UnsupportedEnvironment("buffer size overflows".to_string()))?;
        let bytes = fields
            .checked_mul(std::mem::size_of::<AtomicU32>())
            .ok_or_else(|| LayoutError::UnsupportedEnvironment("buffer size overflows".to_string()))?;
        if bytes > max_bytes {
            return Err(LayoutError::UnsupportedEnvironment(format!(
                "shared segment of {} bytes exceeds limit of {} bytes",
                bytes, max_bytes
            )));
        }

        let data: Arc<[AtomicU32]> = (0..fields).map(|_| AtomicU32::new(0)).collect();
        Ok(SharedBuffer { data, bodies })
    }

    /// Number of body records
    pub fn len(&self) -> usize {
        self.bodies
    }

    /// Check if the buffer holds no records
    pub fn is_empty(&self) -> bool {
        self.bodies == 0
    }

    /// Number of handles onto this buffer
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Load one field component
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn load(&self, index: usize, field: Field, axis: Axis) -> f32 {
        bits_to_float(self.data[self.slot(index, field, axis)].load(Ordering::Acquire))
    }

    /// Store one field component atomically
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn store(&self, index: usize, field: Field, axis: Axis, value: f32) {
        self.data[self.slot(index, field, axis)].store(float_to_bits(value), Ordering::Release);
    }

    /// Atomically add to one field component, returning the previous value
    pub fn add(&self, index: usize, field: Field, axis: Axis, delta: f32) -> f32 {
        let cell = &self.data[self.slot(index, field, axis)];
        let mut current = cell.load(Ordering::Acquire);
        loop {
            let next = float_to_bits(bits_to_float(current) + delta);
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(previous) => return bits_to_float(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Load a whole vector field, component by component
    pub fn load_vec3(&self, index: usize, field: Field) -> Vec3 {
        Vec3::new(
            self.load(index, field, Axis::X) as f64,
            self.load(index, field, Axis::Y) as f64,
            self.load(index, field, Axis::Z) as f64,
        )
    }

    /// Store a whole vector field, component by component
    ///
    /// Each component is atomic; the vector as a unit is not.
    pub fn store_vec3(&self, index: usize, field: Field, value: Vec3) {
        self.store(index, field, Axis::X, value.x as f32);
        self.store(index, field, Axis::Y, value.y as f32);
        self.store(index, field, Axis::Z, value.z as f32);
    }

    /// Zero one field for every body
    pub fn clear_field(&self, field: Field) {
        for index in 0..self.bodies {
            self.store_vec3(index, field, Vec3::ZERO);
        }
    }

    /// Copy one field for every body into `out`
    pub fn read_field(&self, field: Field, out: &mut Vec<Vec3>) {
        out.clear();
        out.extend((0..self.bodies).map(|i| self.load_vec3(i, field)));
    }

    fn slot(&self, index: usize, field: Field, axis: Axis) -> usize {
        assert!(
            index < self.bodies,
            "body index {} out of range for buffer of {}",
            index,
            self.bodies
        );
        index * STRIDE + field.offset() + axis.index()
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("bodies", &self.bodies)
            .field("handles", &self.handle_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_cast_round_trip() {
        let values = [
            0.0f32,
            -0.0,
            1.0,
            -1.5,
            f32::MIN_POSITIVE,
            f32::MAX,
            f32::MIN,
            1e-40, // subnormal
            std::f32::consts::PI,
        ];
        for v in values {
            let back = bits_to_float(float_to_bits(v));
            assert_eq!(back.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_fields_do_not_overlap() {
        let buffer = SharedBuffer::try_new(3).unwrap();
        buffer.store_vec3(1, Field::Position, Vec3::new(1.0, 2.0, 3.0));
        buffer.store_vec3(1, Field::Velocity, Vec3::new(4.0, 5.0, 6.0));
        buffer.store_vec3(1, Field::Force, Vec3::new(7.0, 8.0, 9.0));

        assert_eq!(buffer.load_vec3(1, Field::Position), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(buffer.load_vec3(1, Field::Velocity), Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(buffer.load_vec3(1, Field::Force), Vec3::new(7.0, 8.0, 9.0));
        assert_eq!(buffer.load_vec3(0, Field::Position), Vec3::ZERO);
        assert_eq!(buffer.load_vec3(2, Field::Force), Vec3::ZERO);
    }

    #[test]
    fn test_atomic_add() {
        let buffer = SharedBuffer::try_new(1).unwrap();
        buffer.store(0, Field::Force, Axis::X, 1.5);
        let previous = buffer.add(0, Field::Force, Axis::X, 2.0);
        assert_eq!(previous, 1.5);
        assert_eq!(buffer.load(0, Field::Force, Axis::X), 3.5);
    }

    #[test]
    fn test_clear_and_read_field() {
        let buffer = SharedBuffer::try_new(2).unwrap();
        buffer.store_vec3(0, Field::Force, Vec3::new(1.0, 1.0, 1.0));
        buffer.store_vec3(1, Field::Force, Vec3::new(2.0, 2.0, 2.0));
        buffer.clear_field(Field::Force);

        let mut out = Vec::new();
        buffer.read_field(Field::Force, &mut out);
        assert_eq!(out, vec![Vec3::ZERO, Vec3::ZERO]);
    }

    #[test]
    fn test_size_limit() {
        assert!(matches!(
            SharedBuffer::try_with_limit(10, 16),
            Err(LayoutError::UnsupportedEnvironment(_))
        ));
        assert!(SharedBuffer::try_with_limit(10, 10 * STRIDE * 4).is_ok());
        assert!(SharedBuffer::try_new(usize::MAX).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_index_panics() {
        let buffer = SharedBuffer::try_new(1).unwrap();
        buffer.load(1, Field::Position, Axis::X);
    }

    #[test]
    fn test_clones_share_memory() {
        let buffer = SharedBuffer::try_new(1).unwrap();
        let other = buffer.clone();
        assert_eq!(buffer.handle_count(), 2);
        other.store(0, Field::Velocity, Axis::Z, -4.0);
        assert_eq!(buffer.load(0, Field::Velocity, Axis::Z), -4.0);
    }
}

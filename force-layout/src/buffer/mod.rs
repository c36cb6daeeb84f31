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
//! Zero-copy memory shared between simulation threads
//!
//! - [`SharedBuffer`]: per-body position, velocity and force fields with
//!   field-level atomicity
//! - [`Rendezvous`]: fan-out/fan-in barrier for one tick split across threads

mod rendezvous;
mod shared;

pub use rendezvous::Rendezvous;
pub use shared::{
    bits_to_float, float_to_bits, Field, SharedBuffer, DEFAULT_SHARED_LIMIT, STRIDE,
};

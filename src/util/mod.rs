//! Utility types shared by every stage of the tracer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam plus rays, boxes, planes and frusta

mod error;
mod math;

pub use error::*;
pub use math::*;

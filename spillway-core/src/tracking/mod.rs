//! In-memory tracking state shared by the scanner and the worker pool.

pub mod in_flight;
pub mod stability;

pub use in_flight::{InFlightGuard, InFlightRegistry};
pub use stability::{FileSnapshot, StabilityTracker};

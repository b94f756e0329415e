//! Core shared primitives for lumen.
//!
//! This crate is intentionally small and nearly dependency-free.

mod clock;
mod panic;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use panic::{catch_panic, panic_payload_to_str};

//! Instruction scanning: decode the stores that follow a construction and
//! reduce them to the value's own name and its destructured siblings.

mod collector;
mod decoder;

pub use collector::{Collected, collect};
pub use decoder::{RunEnd, ScanError, StoreEvent, StoreScan, UnpackGroup, scan_stores};

//! Byte-stream decoding helpers shared by the driver and the front end.

pub mod pattern;

pub use pattern::{PatternConfig, PatternDetector};

//! Version model for IntelliJ-based platforms.
//!
//! Parses and compares platform build numbers (`221.6008.13`, `IC-221.6008.13`,
//! `222.*`) and plugin versions (`1.4.2-beta`), and checks them against
//! plugin compatibility ranges.

mod range;
mod version;

pub use range::{is_within_range, CompatibilityRange, RangeCheck, RangeError};
pub use version::{compare, ParseError, Segment, Version};

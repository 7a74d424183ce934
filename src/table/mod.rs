#![forbid(unsafe_code)]

//! In-memory allocation structures backing one pool.
//!
//! [`IntervalTable`] serves flat numeric pools. [`Rib`] is the main prefix
//! table of an IP pool, and [`RangeTables`] hold the isolated per-range
//! address tables carved out of it.

pub mod addr;
mod interval;
mod range;
mod rib;

pub use interval::{Interval, IntervalTable};
pub use range::{RangeTable, RangeTables};
pub use rib::{Rib, Route};

// src/core/timeseries/mod.rs

//! Time-series data model: extents, range queries, series and their wire format.

pub mod extent;
pub mod query;
pub mod series;
pub mod wire;

pub use extent::{Extent, ExtentList};
pub use query::{TimeRangeQuery, align_extent, fast_forward_window};
pub use series::{Point, Series, Timeseries};

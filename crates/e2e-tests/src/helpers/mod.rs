//! Harness helpers: logging, load generation, sink polling.

pub mod assertions;
pub mod director;
pub mod loadgen;
pub mod logging;

pub use assertions::{count_archive_records, wait_for, wait_for_row_count};
pub use director::{start_director, DirectorHarness};
pub use loadgen::{Device, LoadGenerator, RawReading};

//! Utility functions and types

mod parallel;

pub use parallel::{parallel_map_with_config, ParallelConfig};

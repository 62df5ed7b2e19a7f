//! Parallel processing utilities

use crate::error::{PrognosError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for parallel processing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of threads (None = use all available)
    pub n_threads: Option<usize>,
}

impl ParallelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of threads
    pub fn with_threads(mut self, n: usize) -> Self {
        self.n_threads = Some(n);
        self
    }

    /// Get the number of threads to use
    pub fn num_threads(&self) -> usize {
        self.n_threads.unwrap_or_else(rayon::current_num_threads).max(1)
    }

    /// Dedicated pool sized by this configuration
    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads())
            .build()
            .map_err(|e| PrognosError::ConfigError(format!("cannot build worker pool: {}", e)))
    }
}

/// Parallel map on a dedicated pool; output keeps input order
pub fn parallel_map_with_config<T, U, F>(items: Vec<T>, config: &ParallelConfig, f: F) -> Result<Vec<U>>
where
    T: Send + Sync,
    U: Send,
    F: Fn(T) -> U + Send + Sync,
{
    let pool = config.build_pool()?;
    Ok(pool.install(|| items.into_par_iter().map(f).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_map_keeps_order() {
        let items: Vec<i32> = (0..1000).collect();
        let config = ParallelConfig::new().with_threads(4);
        let results = parallel_map_with_config(items, &config, |x| x * 2).unwrap();

        assert_eq!(results.len(), 1000);
        assert_eq!(results[0], 0);
        assert_eq!(results[500], 1000);
    }

    #[test]
    fn test_parallel_config() {
        let config = ParallelConfig::new().with_threads(4);
        assert_eq!(config.n_threads, Some(4));
        assert_eq!(config.num_threads(), 4);
        assert_eq!(ParallelConfig::new().with_threads(0).num_threads(), 1);
    }
}

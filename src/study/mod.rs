//! Studies: template search, threshold filtering, ensembling and resume

mod config;
mod controller;
mod workspace;

pub use config::StudyConfig;
pub use controller::{LeaderboardEntry, Study, StudyState};
pub use workspace::{Checkpoint, CheckpointStatus, Workspace};

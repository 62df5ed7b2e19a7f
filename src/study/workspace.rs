//! Study workspace: per-template checkpoints and the final model
//!
//! Layout under `workspace/<study_name>/`:
//! - `<template id>.ckpt`: one [`Checkpoint`] per template
//! - `model.p`: the final ensemble

use crate::ensemble::EnsembleModel;
use crate::error::{PrognosError, Result};
use crate::export::{decode, encode, write_atomic, ArtifactKind};
use crate::optimizer::Trial;
use crate::pipeline::PipelineTemplate;
use crate::plugins::PluginRegistry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CHECKPOINT_EXTENSION: &str = "ckpt";
const MODEL_FILE: &str = "model.p";

/// Whether the last pass recorded in a checkpoint ran to its budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Complete,
    /// Interrupted mid-pass; `trials_consumed` trials of that pass are done
    Incomplete,
}

/// Persisted search state of one template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub template: PipelineTemplate,
    pub score_threshold: f64,
    /// Fully finished outer passes
    pub passes_completed: usize,
    pub status: CheckpointStatus,
    /// Trials consumed in the pass in progress; zero when complete
    pub trials_consumed: usize,
    /// Wall-clock seconds spent in the pass in progress
    pub pass_elapsed_secs: f64,
    /// Total search time across passes
    pub elapsed_secs: f64,
    /// Append-only trial history across passes
    pub history: Vec<Trial>,
    pub best: Option<Trial>,
}

impl Checkpoint {
    /// State of a template that has not been searched yet
    pub fn new(template: PipelineTemplate, score_threshold: f64) -> Self {
        Self {
            template,
            score_threshold,
            passes_completed: 0,
            status: CheckpointStatus::Complete,
            trials_consumed: 0,
            pass_elapsed_secs: 0.0,
            elapsed_secs: 0.0,
            history: Vec::new(),
            best: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Complete
    }
}

/// Directory holding one study's artifacts
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(base: impl AsRef<Path>, study_name: &str) -> Self {
        Self {
            root: base.as_ref().join(study_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the study directory
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            PrognosError::PersistenceError(format!(
                "workspace {} is not writable: {}",
                self.root.display(),
                e
            ))
        })
    }

    pub fn checkpoint_path(&self, template: &PipelineTemplate) -> PathBuf {
        self.root
            .join(format!("{}.{}", template.id(), CHECKPOINT_EXTENSION))
    }

    pub fn model_path(&self) -> PathBuf {
        self.root.join(MODEL_FILE)
    }

    /// Whether any checkpoint exists, i.e. a run would resume
    pub fn has_checkpoints(&self) -> bool {
        fs::read_dir(&self.root)
            .map(|entries| {
                entries.filter_map(|e| e.ok()).any(|e| {
                    e.path().extension().and_then(|x| x.to_str()) == Some(CHECKPOINT_EXTENSION)
                })
            })
            .unwrap_or(false)
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = encode(ArtifactKind::Checkpoint, checkpoint)?;
        write_atomic(&self.checkpoint_path(&checkpoint.template), &bytes)?;
        debug!(
            template = %checkpoint.template,
            passes = checkpoint.passes_completed,
            trials = checkpoint.history.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Stored checkpoint of a template. A missing, unreadable or corrupt
    /// checkpoint is treated as absent.
    pub fn load_checkpoint(&self, template: &PipelineTemplate) -> Option<Checkpoint> {
        let path = self.checkpoint_path(template);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable checkpoint ignored");
                return None;
            }
        };
        match decode::<Checkpoint>(ArtifactKind::Checkpoint, &bytes) {
            Ok(checkpoint) if checkpoint.template == *template => Some(checkpoint),
            Ok(_) => {
                warn!(path = %path.display(), "checkpoint belongs to another template, ignored");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt checkpoint ignored");
                None
            }
        }
    }

    pub fn save_model(&self, model: &EnsembleModel) -> Result<()> {
        model.save(self.model_path())
    }

    pub fn load_model(&self, registry: &PluginRegistry) -> Result<EnsembleModel> {
        EnsembleModel::load(self.model_path(), registry)
    }
}

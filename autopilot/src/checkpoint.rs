//! Checkpoints: commit markers that attempts can be rolled back to.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::Checkpoint;
use crate::io::git::{CHECKPOINT_PREFIX, Git};

/// Creates, tracks and restores checkpoints for one work item.
#[derive(Debug)]
pub struct CheckpointManager {
    git: Git,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(git: Git) -> Self {
        Self {
            git,
            checkpoints: Vec::new(),
        }
    }

    /// Stage everything and commit a marker, even when nothing changed.
    ///
    /// Version-control failures are logged and yield `None`: the caller
    /// proceeds without rollback safety.
    #[instrument(skip_all, fields(name))]
    pub fn create_checkpoint(
        &mut self,
        name: &str,
        description: &str,
        score: f64,
    ) -> Option<Checkpoint> {
        match self.commit_marker(name, description) {
            Ok(commit) => {
                let checkpoint = Checkpoint {
                    name: name.to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    commit,
                    description: description.to_string(),
                    score,
                };
                info!(commit = %checkpoint.commit, score, "checkpoint created");
                self.checkpoints.push(checkpoint.clone());
                Some(checkpoint)
            }
            Err(err) => {
                warn!(err = %err, "checkpoint creation failed");
                None
            }
        }
    }

    fn commit_marker(&self, name: &str, description: &str) -> Result<String> {
        self.git.add_all()?;
        self.git
            .commit_allow_empty(&format!("{CHECKPOINT_PREFIX} {name}: {description}"))?;
        self.git.head_sha()
    }

    /// Hard-reset the tree to the checkpoint's commit. Later changes are lost.
    #[instrument(skip_all, fields(name = %checkpoint.name))]
    pub fn rollback_to(&self, checkpoint: &Checkpoint) -> bool {
        match self.git.reset_hard(&checkpoint.commit) {
            Ok(()) => {
                info!(commit = %checkpoint.commit, "rolled back");
                true
            }
            Err(err) => {
                warn!(err = %err, "rollback failed");
                false
            }
        }
    }

    /// Highest-scoring checkpoint; the earliest wins ties.
    pub fn get_best_checkpoint(&self) -> Option<&Checkpoint> {
        let mut best: Option<&Checkpoint> = None;
        for checkpoint in &self.checkpoints {
            if best.is_none_or(|b| checkpoint.score > b.score) {
                best = Some(checkpoint);
            }
        }
        best
    }

    /// Best checkpoint among those whose name starts with `prefix`.
    pub fn best_with_prefix(&self, prefix: &str) -> Option<&Checkpoint> {
        let mut best: Option<&Checkpoint> = None;
        for checkpoint in self.checkpoints.iter().filter(|c| c.name.starts_with(prefix)) {
            if best.is_none_or(|b| checkpoint.score > b.score) {
                best = Some(checkpoint);
            }
        }
        best
    }
}

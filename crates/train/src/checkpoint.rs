//! When and where model weights are written.
//!
//! Counters are 1-based: the policy is asked after every iteration with
//! `epoch + 1` and `iterations_done + 1`.

use std::path::PathBuf;

use candle_nn::VarMap;

/// Which counter drives checkpointing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
    /// Every `save_by_epoch` epochs, at the epoch boundary.
    Epoch,
    /// Every `save_by_iter` iterations.
    Iter,
}

impl SaveMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "iter" => Self::Iter,
            _ => Self::Epoch,
        }
    }
}

/// Network a checkpoint belongs to; also the filename suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelRole {
    Generator,
    Discriminator,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Discriminator => "discriminator",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointPolicy {
    pub mode: SaveMode,
    pub save_by_epoch: usize,
    pub save_by_iter: usize,
    pub batch_size: usize,
    pub dir: PathBuf,
}

impl CheckpointPolicy {
    /// Whether to save after `iteration` (global, 1-based) within `epoch`
    /// (1-based). A zero cadence never saves.
    pub fn should_save(&self, epoch: usize, iteration: usize, batches_per_epoch: usize) -> bool {
        match self.mode {
            SaveMode::Epoch => {
                self.save_by_epoch > 0
                    && batches_per_epoch > 0
                    && epoch % self.save_by_epoch == 0
                    && iteration % batches_per_epoch == 0
            }
            SaveMode::Iter => self.save_by_iter > 0 && iteration % self.save_by_iter == 0,
        }
    }

    /// The counter embedded in the filename.
    pub fn counter(&self, epoch: usize, iteration: usize) -> usize {
        match self.mode {
            SaveMode::Epoch => epoch,
            SaveMode::Iter => iteration,
        }
    }

    pub fn file_name(&self, counter: usize, role: ModelRole) -> String {
        format!(
            "SimpleModel{counter}_bs{}_{}.pth",
            self.batch_size,
            role.as_str()
        )
    }

    pub fn path(&self, counter: usize, role: ModelRole) -> PathBuf {
        self.dir.join(self.file_name(counter, role))
    }

    /// Save `varmap` if the policy fires. A failed write is logged and
    /// reported as `None`; training carries on.
    pub fn maybe_save(
        &self,
        varmap: &VarMap,
        role: ModelRole,
        epoch: usize,
        iteration: usize,
        batches_per_epoch: usize,
    ) -> Option<PathBuf> {
        if !self.should_save(epoch, iteration, batches_per_epoch) {
            return None;
        }
        let path = self.path(self.counter(epoch, iteration), role);
        match varmap.save(&path) {
            Ok(()) => {
                match self.mode {
                    SaveMode::Epoch => tracing::info!(
                        path = %path.display(),
                        "The trained model {} is successfully saved at epoch {epoch}",
                        role.as_str()
                    ),
                    SaveMode::Iter => tracing::info!(
                        path = %path.display(),
                        "The trained model {} is successfully saved at iteration {iteration}",
                        role.as_str()
                    ),
                }
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "checkpoint write failed");
                None
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

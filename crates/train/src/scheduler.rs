//! Epoch-based learning-rate schedule.

// ── Linear decay ────────────────────────────────────────────────────────────

/// Constant learning rate until `decrease_epoch`, then a straight line down
/// to zero at `total_epochs`.
///
/// ```text
/// lr(e) = base                                          e <  decrease_epoch
/// lr(e) = base · (total − e) / (total − decrease_epoch)  e ≥ decrease_epoch
/// ```
///
/// Generator and discriminator each get their own instance with their own
/// base rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearDecay {
    base_lr: f64,
    total_epochs: usize,
    decrease_epoch: usize,
}

impl LinearDecay {
    pub fn new(base_lr: f64, total_epochs: usize, decrease_epoch: usize) -> Self {
        Self {
            base_lr,
            total_epochs,
            decrease_epoch,
        }
    }

    /// Learning rate for (0-based) `epoch`.
    ///
    /// A threshold at or past the last epoch never decays. Epochs beyond
    /// `total_epochs` stay at zero.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        if epoch < self.decrease_epoch || self.total_epochs <= self.decrease_epoch {
            return self.base_lr;
        }
        let decay_epochs = (self.total_epochs - self.decrease_epoch) as f64;
        let remaining = self.total_epochs.saturating_sub(epoch) as f64;
        self.base_lr * remaining / decay_epochs
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

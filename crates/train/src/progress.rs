//! Per-iteration progress line and time-left estimate.

use std::time::{Duration, Instant};

/// Estimates time left from the wall-clock length of the last iteration.
pub struct EtaClock {
    prev: Instant,
}

impl EtaClock {
    pub fn start() -> Self {
        Self {
            prev: Instant::now(),
        }
    }

    /// Mark the end of an iteration and return `iters_left × last delta`.
    pub fn tick(&mut self, iters_left: usize) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.prev);
        self.prev = now;
        estimate(delta, iters_left)
    }
}

/// `per_iter × iters_left`, saturating instead of overflowing.
pub fn estimate(per_iter: Duration, iters_left: usize) -> Duration {
    per_iter
        .checked_mul(u32::try_from(iters_left).unwrap_or(u32::MAX))
        .unwrap_or(Duration::MAX)
}

/// `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
pub fn format_time_left(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let rem = total % 86_400;
    let hms = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => hms,
        1 => format!("1 day, {hms}"),
        n => format!("{n} days, {hms}"),
    }
}

/// Losses shown on the progress line.
#[derive(Debug, Clone, Copy)]
pub struct LineLosses {
    pub l1: f32,
    pub ssim: f32,
    pub perceptual: f32,
}

/// `[Epoch e/E] [Batch b/B] [Loss: l1 ssim perceptual] Time_left: t`.
pub fn progress_line(
    epoch: usize,
    epochs: usize,
    batch: usize,
    batches: usize,
    losses: LineLosses,
    time_left: Duration,
) -> String {
    format!(
        "[Epoch {epoch}/{epochs}] [Batch {batch}/{batches}] [Loss: {:.4} {:.4} {:.4}] Time_left: {}",
        losses.l1,
        losses.ssim,
        losses.perceptual,
        format_time_left(time_left)
    )
}

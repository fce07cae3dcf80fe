//! # sensing-train — adversarial training
//!
//! * **[`Trainer`]** — owns generator + discriminator, their optimisers and
//!   schedules. [`Trainer::step`] runs one G update then one D update;
//!   [`Trainer::fit`] drives epochs, samples, progress and checkpoints.
//! * **[`LinearDecay`]** — constant LR, then linear decay to zero.
//! * **[`CheckpointPolicy`]** — epoch or iteration cadence, file naming.

pub mod checkpoint;
pub mod progress;
pub mod sample;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{CheckpointPolicy, ModelRole, SaveMode};
pub use progress::{format_time_left, progress_line, EtaClock, LineLosses};
pub use sample::{save_sample_triplet, should_sample};
pub use scheduler::LinearDecay;
pub use trainer::{
    cuda_device_count, select_device, FitSummary, StepMetrics, StepOutput, Trainer,
    TrainerConfig,
};

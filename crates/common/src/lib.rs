//! # sensing-common — Shared Primitives
//!
//! Types and utilities shared across every crate in the workspace:
//!
//! * **[`SensingGanConfig`]** — network hyper-parameters (serialised as JSON).
//! * **[`PairDataset`]** / **[`ImagePairFolder`]** / **[`PairLoader`]** — paired
//!   image loading & batching.
//! * **[`image_to_tensor`]** / **[`save_png`]** — image ↔ tensor conversion.

pub mod config;
pub mod data;
pub mod imageio;

pub use config::{GanMode, SensingGanConfig};
pub use data::{EpochBatches, ImagePairFolder, PairDataset, PairLoader, TensorPairs};
pub use imageio::{crop_to_multiple, image_to_tensor, load_image, save_png, tensor_to_image};

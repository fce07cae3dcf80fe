//! # sensing-infer — denoising runtime
//!
//! * **[`DenoiseRuntime`]** — load `config.json` + a generator checkpoint
//!   and run single images through it.

pub mod runtime;

pub use runtime::DenoiseRuntime;

//! # Splat Checkpoint
//!
//! Checkpointing for Gaussian-splat training: one file per save holding the
//! model snapshot, optimizer snapshot, step counter, RNG states and optional
//! caller data, restored into a ready-to-train session. Built on the Burn ML
//! framework.
//!
//! ## Modules
//!
//! - [`checkpoint`]: Checkpoint record, save/load, collaborator contracts, directory management
//! - [`scene`]: Gaussian splat model and its state snapshot
//! - [`optim`]: Per-group Adam optimizer and its state snapshot
//! - [`rng`]: Owned random generators with capturable state
//! - [`session`]: Training session that resumes from and writes checkpoints
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod optim;
pub mod rng;
pub mod scene;
pub mod session;

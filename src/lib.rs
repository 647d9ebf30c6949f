//! Concurrent batch execution for image pipelines.
//!
//! The [`engine`] module runs a batch of independent items under a
//! concurrency policy and a failure mode, and reports one outcome per item
//! in submission order. The [`service`] module builds the two image
//! workloads on top of it: directory upload and multi-size resize.

pub mod config;
pub mod engine;
pub mod error;
pub mod service;
pub mod ui;

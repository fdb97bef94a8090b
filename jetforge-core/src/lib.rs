//! jetforge core - GPU-stack provisioning orchestrator for NVIDIA
//! Jetson boards
//!
//! Resolves a requested component version against a fixed catalog,
//! fetches and verifies the artifact through a content-addressed cache,
//! and drives an idempotent, resumable install pipeline.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod pipeline;

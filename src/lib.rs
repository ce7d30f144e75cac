//! # workflow-tagger
//!
//! Batch tagging engine for remote workflow records.
//!
//! Applies one classification tag to every record in a mapping through a
//! rate-limited REST API: bounded worker pool, classified retries with
//! exponential backoff and escalating timeouts, a cached tag service, and a
//! phase-by-phase orchestrator that always ends in a full per-item report.

pub mod api;
pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod mapping;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod tags;
pub mod telemetry;

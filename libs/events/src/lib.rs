//! # tether-events
//!
//! Outbound message definitions produced by the tether bridge.
//!
//! ## Design Principles
//!
//! - Messages describe observed cluster state; they never own it
//! - Consumers are idempotent, so every message may be delivered more than once
//! - A route message carries routes on exactly one side (register or unregister)
//!   when produced by an informer; the poll path only registers
//!
//! ## Message Types
//!
//! - Route messages (`router.register`, `router.unregister`)
//! - Crash reports (one per qualifying lifecycle event)
//! - Metric batches (gauges keyed by app and instance index)

mod crash;
mod error;
mod metrics;
mod route;

pub use crash::CrashReport;
pub use error::EventError;
pub use metrics::*;
pub use route::*;

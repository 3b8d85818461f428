//! Gatekeeper - Dual-Tier Admission Control
//!
//! This crate decides, for every inbound HTTP request, whether it may
//! proceed. Two fixed-window budgets apply in order: a service-wide global
//! budget and a per-client budget. Counters live either in process memory
//! or in a shared store such as Redis, so several instances can enforce
//! one budget together.

pub mod admission;
pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
pub mod telemetry;

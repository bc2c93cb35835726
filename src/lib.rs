//! Slidegate - Sliding Log Request Admission Control
//!
//! This crate decides, per incoming request, whether to admit or reject it
//! based on how many requests the same client made in a trailing window. The
//! request log lives in a shared store (Redis), so any number of service
//! instances enforce one limit. Recognized events in a request can lift a
//! client's limit for a while, and a failing store never blocks traffic.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

//! Turnstile - Keyed Fixed-Window Rate Limiting
//!
//! This crate bounds how many requests an actor (anonymous client, identified
//! user, or API-key holder) may issue within a fixed time window. The core lives
//! in [`ratelimit`]: a sharded keyed counter store, a pure window policy, pluggable
//! key strategies, and the [`ratelimit::RateLimiter`] that composes them. The
//! [`http`] module is a thin axum adapter over that core.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

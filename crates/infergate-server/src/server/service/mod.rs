//! HTTP surface of the gateway.
//!
//! This module maps the dispatch core onto axum routes: admission and
//! response waiting for `/infer`, metrics snapshots and resets, and a
//! liveness probe that bypasses the core entirely.
//!
//! ## Structure
//!
//! - [`handler`] - Route handlers and the router builder.
//! - [`error`] - Mapping of core errors onto HTTP responses.

pub mod error;
pub mod handler;

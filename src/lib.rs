//! # Banana Vision Service
//!
//! Backend-for-frontend of the Banana Vision farm-monitoring dashboard.
//!
//! Detection results are produced by an external inference pipeline and
//! stored on the data platform (PostgREST + GoTrue). This crate exposes
//! them to the dashboard: weekly tree-health statistics, paginated result
//! and user listings, and cookie-based sign-in relayed to the platform's
//! auth API.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Dashboard  │──▶│  HTTP (axum) │──▶│ Gateways         │──▶ data platform
//! │ frontend   │   │  server.rs   │   │ results / users  │    (REST + auth)
//! └────────────┘   └──────┬───────┘   │ auth             │
//!                         │           └──────────────────┘
//!                         ▼
//!                  WeeklyAggregator (banana-vision-core)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`logging`] | Tracing subscriber setup |
//! | [`platform`] | HTTP client for the data platform |
//! | [`results`] | `ResultStore` over `inference_results` |
//! | [`users`] | `UserDirectory` over `profiles` and auth admin |
//! | [`auth`] | Credential exchange and sign-up |
//! | [`server`] | Routes, error mapping, app state |
//!
//! Week math, aggregation, pagination and the gateway traits live in the
//! `banana-vision-core` crate, re-exported under its own name as
//! [`banana_vision_core`].

pub use banana_vision_core;

pub mod auth;
pub mod config;
pub mod logging;
pub mod platform;
pub mod results;
pub mod server;
pub mod users;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexport_leaves_builtin_core_in_scope() {
        let page = banana_vision_core::pagination::PageRequest::new(Some(3), Some(20)).unwrap();
        assert_eq!(page.offset(), 40);
        assert_eq!(core::cmp::max(page.limit(), 1), 20);
    }
}

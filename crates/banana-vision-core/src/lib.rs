//! # Banana Vision Core
//!
//! Runtime-agnostic logic for the Banana Vision service: data models,
//! ISO-week arithmetic, the weekly aggregation engine, pagination rules,
//! and the gateway traits the service implements against its data platform.
//!
//! This crate has no tokio, HTTP, or filesystem dependencies; everything
//! that talks to the network lives in the `banana-vision` crate.

pub mod aggregate;
pub mod error;
pub mod models;
pub mod pagination;
pub mod store;
pub mod week;

//! Cache-aside response materialization for axum routes.
//!
//! See [`cache`] for the request pipeline; [`infra`] carries the demo host.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;

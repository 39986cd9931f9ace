//! services/api/src/lib.rs
//!
//! The HTTP service around `ride_platform_core`: configuration, adapters for
//! Postgres, blob storage, payments and OCR, and the axum web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;

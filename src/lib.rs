//! Rider seal service
//!
//! Certifies uploaded riders through a four-state seal lifecycle, resolves
//! redirect chains for expired riders, verifies content integrity by SHA-256,
//! and runs deduplicated background analysis whose score can auto-promote a
//! rider to validated.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

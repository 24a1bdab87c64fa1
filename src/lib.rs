//! Stock simulation backend-for-frontend.
//!
//! Serves simulation parameters (with an audit trail of every change) and
//! aligned price history to a browser dashboard. The binary in `main.rs`
//! wires these modules to an axum server.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod params;
pub mod seed;
pub mod store;
pub mod timeseries;

pub use error::{CoreError, Result};

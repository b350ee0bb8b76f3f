//! Group expense splitting: members of a fixed roster share expenses equally,
//! and balances are recomputed from the full expense list on every read.

pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod routes;
pub mod schemas;
pub mod store;
pub mod telemetry;

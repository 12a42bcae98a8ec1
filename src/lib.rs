//! Dealership training analytics: a filter-and-aggregate pipeline over the
//! reporting store, with three report pages behind a single login gate.

pub mod aggregate;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod report;

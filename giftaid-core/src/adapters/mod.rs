//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for claim, donation, charity and credential storage
//! - Blocking HTTP client for the GovTalk gateway transport

pub mod duckdb;
pub mod govtalk;

#[cfg(test)]
pub mod govtalk_mock;

//! Durable bot registry storage backed by PostgreSQL.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

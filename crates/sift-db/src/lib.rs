//! Persistence and coordination for Sift: the PostgreSQL job queue and
//! insight store, and the Redis rate-limit window.

pub mod config;
pub mod database;
pub mod insight_repository;
pub mod job_repository;
pub mod rate_limit_store;

pub use config::{DatabaseConfig, RedisConfig};
pub use database::Database;
pub use insight_repository::InsightRepository;
pub use job_repository::IngestJobRepository;
pub use rate_limit_store::RedisRateLimitStore;

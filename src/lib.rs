pub mod config;
pub mod engine;
pub mod gateway;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod wal;

pub mod alerts;
pub mod auth;
pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod seed;
pub mod sql;
pub mod time;
pub mod tls;
pub mod wal;
pub mod wire;

pub mod config;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod permission;
pub mod store;
pub mod sweeper;
pub mod wal;

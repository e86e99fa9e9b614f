pub mod clock;
pub mod config;
pub mod engine;
pub mod geo;
pub mod journal;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod reaper;
pub mod storage;
pub mod wal;

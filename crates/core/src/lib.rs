pub mod analysis;
pub mod config;
pub mod domain;
pub mod filter;
pub mod ingest;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod time;

pub mod admission;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod monitor;
pub mod process;
pub mod recovery;
pub mod server;
pub mod utils;

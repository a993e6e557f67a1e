pub mod agent;
pub mod batch;
pub mod cli;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod export;
pub mod loader;
pub mod logging;
pub mod matcher;
pub mod orchestrator;
pub mod progress;
pub mod session;

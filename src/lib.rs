pub mod audit;
pub mod checkpoint;
pub mod citations;
pub mod config;
pub mod docket_config;
pub mod errors;
pub mod executor;
pub mod gates;
pub mod generation;
pub mod init;
pub mod judge;
pub mod logging;
pub mod motion;
pub mod orchestrator;
pub mod phase;
pub mod policy;
pub mod retry;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;

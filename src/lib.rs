pub mod address;
pub mod applier;
pub mod blockdb;
pub mod config;
pub mod constants;
pub mod decode;
pub mod loader;
pub mod pipeline;
pub mod report;
pub mod sequencer;
pub mod snapshot;
pub mod telemetry;
pub mod toplist;
pub mod types;

#[cfg(test)]
pub mod testutil;

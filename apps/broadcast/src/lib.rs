pub mod config;
pub mod engine;
pub mod media;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod transport;

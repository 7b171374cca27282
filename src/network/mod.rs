pub mod client;
pub mod envelope;
pub mod error;

pub use client::{RpcSettings, TelemetryClient};
pub use error::RpcError;

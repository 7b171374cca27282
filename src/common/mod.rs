pub mod types;

pub use types::{PodWithStats, PodsResponse, StatsResponse, TelemetryMethod, VersionResponse};

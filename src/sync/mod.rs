pub mod reconcile;
pub mod worker;

pub use reconcile::reconcile_pod;
pub use worker::{SyncSettings, SyncWorker};

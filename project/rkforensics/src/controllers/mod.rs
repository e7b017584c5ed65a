pub mod manager;
pub mod podcheckpoint;

pub use manager::{Controller, ControllerManager, ReconcileResult};
pub use podcheckpoint::{Clock, PodCheckpointController, RealClock};

//! Shared state between the pipeline driver and its controls
//!
//! The quit listener and the driver run on different threads; they only
//! share the stop signal and the run counters defined here.

pub mod state;

pub use state::{PipelineStats, ShutdownSignal};

//! Background Tasks Module
//!
//! # Tasks
//! - TTL Cleanup: Sweeps expired memory backend entries at configured intervals
//! - Start-up probe: Pings the backend once to seed the health status

mod cleanup;
mod probe;

pub use cleanup::spawn_cleanup_task;
pub use probe::spawn_startup_probe;

//! Backend health tracking.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::backend::BackendKind;

// == Backend Health ==
/// Tri-state reachability of the cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendHealth {
    /// No backend configured; never changes for the life of the process
    Disabled,
    /// The last probe or operation succeeded
    Connected,
    /// The last probe or operation failed
    Down,
}

impl BackendHealth {
    fn to_u8(self) -> u8 {
        match self {
            BackendHealth::Disabled => 0,
            BackendHealth::Connected => 1,
            BackendHealth::Down => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BackendHealth::Disabled,
            1 => BackendHealth::Connected,
            _ => BackendHealth::Down,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendHealth::Disabled => "disabled",
            BackendHealth::Connected => "connected",
            BackendHealth::Down => "down",
        }
    }
}

// == Health Status ==
/// Shared, atomically updated health holder.
///
/// Cloning yields another handle on the same state.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    state: Arc<AtomicU8>,
}

impl HealthStatus {
    pub fn new(initial: BackendHealth) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(initial.to_u8())),
        }
    }

    /// Initial status for a backend: disabled for the no-op backend,
    /// down for anything else until a probe succeeds.
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::None => Self::new(BackendHealth::Disabled),
            _ => Self::new(BackendHealth::Down),
        }
    }

    pub fn get(&self) -> BackendHealth {
        BackendHealth::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records a success. Returns true when the status changed.
    pub fn mark_connected(&self) -> bool {
        self.transition(BackendHealth::Connected)
    }

    /// Records a failure. Returns true when the status changed.
    pub fn mark_down(&self) -> bool {
        self.transition(BackendHealth::Down)
    }

    fn transition(&self, target: BackendHealth) -> bool {
        let disabled = BackendHealth::Disabled.to_u8();
        let target = target.to_u8();
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != disabled && current != target).then_some(target)
            })
            .is_ok()
    }
}

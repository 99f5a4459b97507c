//! # discovery
//!
//! BLE advertise/scan wrapper (spec §4.E). Start/stop are idempotent; a
//! duplicate `start()` or `stop()` returns `false` instead of erroring.
//! The only implemented transport kind is BLE; the provider/service
//! shape this presents to `connector::FramedConnector` is the seam a
//! different transport kind would plug into.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ble,
}

pub struct Discovery {
    kind: TransportKind,
    running: AtomicBool,
}

impl Discovery {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            running: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Returns `false` if discovery was already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Returns `false` if discovery was already stopped.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

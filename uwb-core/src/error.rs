//! # error
//!
//! Unified error taxonomy (spec §7). Every public, fallible API in this
//! crate returns `Result<T, Error>`. Internal background-task bodies that
//! only log and continue use `anyhow::Result` instead — see `main.rs` and
//! the per-task loops in `session.rs` / `secure_session/`.

use thiserror::Error;
use uwb_types::{RangingChangeReason, SessionHandle};

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid TLV, wrong status word, malformed data packet. Propagated as
    /// `PROTOCOL_SPECIFIC` to the client; aborts the owning sub-session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// BLE connection loss, characteristic read/write failure, descriptor
    /// write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unknown or out-of-range fields at open/reconfigure time. Rejected
    /// synchronously.
    #[error("bad parameter: {0}")]
    Parameter(String),

    /// Session-limit exceeded, chip not ready.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// A bounded wait (open/start/close-notify, tunnel round-trip) expired.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Airplane mode, regulatory closure, user disable.
    #[error("system policy: {0}")]
    SystemPolicy(String),

    /// HAL initialisation failure, SE unavailable at boot. Subsequent open
    /// calls fail fast once this has been observed.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The referenced session handle has no live record.
    #[error("no such session: {0}")]
    NoSuchSession(SessionHandle),

    /// A duplicate open was attempted for a handle already tracked.
    #[error("duplicate session handle: {0}")]
    DuplicateSession(SessionHandle),
}

impl Error {
    /// Maps this error to the closed reason enum surfaced on stop/close.
    /// This is the single mapping site between the two enums.
    pub fn as_ranging_change_reason(&self) -> RangingChangeReason {
        match self {
            Error::Protocol(_) => RangingChangeReason::ProtocolSpecific,
            Error::Transport(_) => RangingChangeReason::RemoteRequest,
            Error::Parameter(_) => RangingChangeReason::BadParameters,
            Error::Resource(_) => RangingChangeReason::MaxSessionsReached,
            Error::Timeout(_) => RangingChangeReason::Unknown,
            Error::SystemPolicy(_) => RangingChangeReason::SystemPolicy,
            Error::Fatal(_) => RangingChangeReason::Unknown,
            Error::NoSuchSession(_) | Error::DuplicateSession(_) => RangingChangeReason::BadParameters,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

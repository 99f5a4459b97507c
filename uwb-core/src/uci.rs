//! # uci
//!
//! Supplemented UCI transport contract (spec §2.1): the `UciHal` trait
//! the session/adapter layer is written against, plus the app-config TLV
//! encoder used to push parameter sets to the radio. `uwb-hal-sim`
//! implements this trait over an in-process channel.

use uwb_types::{RangingChangeReason, UciSessionId};

use crate::error::Result;

/// UCI status codes as reported by the radio, distinct from
/// [`RangingChangeReason`]. No implicit conversion exists between the
/// two; see [`close_reason_for_status`] for the one explicit mapping site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UciStatusCode {
    Ok,
    Rejected,
    Failed,
    SyntaxError,
    InvalidParam,
    InvalidRange,
    ReadOnly,
    CommandRetry,
    SessionNotExist,
    SessionDuplicate,
    SessionActive,
    MaxSessionsExceeded,
    SessionNotConfigured,
    ActiveSessionsOngoing,
}

/// The single explicit mapping from a radio status code to the
/// client-facing close reason, used only by the session manager's
/// timeout/close path.
pub fn close_reason_for_status(status: UciStatusCode) -> RangingChangeReason {
    match status {
        UciStatusCode::Ok => RangingChangeReason::Unknown,
        UciStatusCode::MaxSessionsExceeded => RangingChangeReason::MaxSessionsReached,
        UciStatusCode::InvalidParam | UciStatusCode::InvalidRange | UciStatusCode::SyntaxError => {
            RangingChangeReason::BadParameters
        }
        UciStatusCode::SessionNotExist
        | UciStatusCode::SessionDuplicate
        | UciStatusCode::SessionActive
        | UciStatusCode::SessionNotConfigured
        | UciStatusCode::ActiveSessionsOngoing => RangingChangeReason::ProtocolSpecific,
        UciStatusCode::Rejected | UciStatusCode::Failed | UciStatusCode::ReadOnly | UciStatusCode::CommandRetry => {
            RangingChangeReason::Unknown
        }
    }
}

/// A single UCI app-config parameter, TLV-encoded bit-exactly onto the
/// wire (spec §6 "UCI wire format").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfigParam {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl AppConfigParam {
    pub fn new(tag: u8, value: Vec<u8>) -> Self {
        Self { tag, value }
    }

    /// Errors rather than silently truncating the length byte when
    /// `value` is longer than a single-byte TLV length field can hold.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.value.len() > 255 {
            return Err(crate::error::Error::Parameter(format!(
                "app-config value too long for one-byte TLV length: {} bytes",
                self.value.len()
            )));
        }
        let mut out = Vec::with_capacity(self.value.len() + 2);
        out.push(self.tag);
        out.push(self.value.len() as u8);
        out.extend_from_slice(&self.value);
        Ok(out)
    }
}

/// Commands the session/adapter layer issues to the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    SessionInit { session_id: UciSessionId },
    SessionDeinit { session_id: UciSessionId },
    SetAppConfig { session_id: UciSessionId, params: Vec<AppConfigParam> },
    RangeStart { session_id: UciSessionId },
    RangeStop { session_id: UciSessionId },
    SetDeviceEnabled { enabled: bool },
    VendorMessage { gid: u8, oid: u8, payload: Vec<u8> },
}

/// Radio-side session state reported in `SESSION_STATUS_NTF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UciSessionState {
    Init,
    Deinit,
    Active,
    Idle,
}

/// Notifications the radio pushes asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum UciNotification {
    SessionStatus {
        session_id: UciSessionId,
        state: UciSessionState,
        status: UciStatusCode,
    },
    RangeData {
        session_id: UciSessionId,
        raw_measurements: Vec<u8>,
    },
    DeviceStatus {
        enabled: bool,
    },
}

/// The radio HAL boundary (spec §2.1). A real driver binding implements
/// this trait; `uwb-hal-sim` is the in-process stand-in used for tests
/// and local development.
pub trait UciHal: Send + Sync {
    fn send_command(&self, command: UciCommand) -> Result<()>;
    /// Non-blocking poll for the next queued notification, mirroring the
    /// style of [`crate::connector::GattLink::poll_recv`].
    fn poll_notification(&self) -> Option<UciNotification>;
}

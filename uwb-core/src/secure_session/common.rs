//! Shared skeleton for the four secure ranging sub-session variants
//! (spec §4.H): *start → establish channel → exchange session-data via
//! CSML → commit locally (or receive RDS-available) → ready →
//! terminate*. Each variant lives in its own sibling module and only
//! supplies the decision tree that differs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::apdu::CommandApdu;
use crate::error::{Error, Result};
use crate::secure_channel::{DispatchResponse, FiraSecureChannel, SecureEvent};
use uwb_types::{TAG_CONTROLEE_INFO, TAG_SESSION_DATA};

/// Bounded wait on every outgoing tunnelled request (spec §4.H "Shared
/// contract").
pub const TUNNEL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum SecureSessionOutcome {
    SessionDataReady {
        data: Vec<u8>,
        rds_already_armed: bool,
    },
    SessionTerminated,
    SessionAborted(String),
}

/// Waits for the next event on `events`, applying the shared tunnel
/// timeout. A timeout or closed channel both abort the sub-session,
/// matching "timeout calls terminateLocally() and surfaces
/// onSessionAborted".
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<SecureEvent>) -> SecureEvent {
    match timeout(TUNNEL_TIMEOUT, events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => SecureEvent::Terminated,
        Err(_) => SecureEvent::CommandFailure("tunnel timeout".into()),
    }
}

/// Applies the three common abort checks shared by every variant (§4.H
/// "Common aborts"): transaction-complete-with-errors, dispatch command
/// failure, and setup error.
pub fn common_abort(event: &SecureEvent) -> Option<SecureSessionOutcome> {
    match event {
        SecureEvent::DispatchResponseAvailable(d) if d.is_transaction_complete_with_errors() => {
            Some(SecureSessionOutcome::SessionAborted("transaction complete with errors".into()))
        }
        SecureEvent::CommandFailure(msg) => Some(SecureSessionOutcome::SessionAborted(msg.clone())),
        SecureEvent::SetupError(msg) => Some(SecureSessionOutcome::SessionAborted(msg.clone())),
        SecureEvent::Terminated => Some(SecureSessionOutcome::SessionTerminated),
        SecureEvent::DispatchResponseAvailable(_) => None,
    }
}

/// True if the dispatch notification carries the RDS-available flag
/// (`E1 ... 82 02 01 01`, spec §4.H.1).
pub fn notification_has_rds_available(dispatch: &DispatchResponse) -> bool {
    dispatch
        .notification
        .as_ref()
        .map(|tlvs| {
            crate::tlv::Tlv::find(tlvs, 0x82)
                .map(|t| t.value == [0x01, 0x01])
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Fetches session data from our own local applet (the "session data
/// deferred to local applet" path common to multiple variants).
pub fn fetch_local_session_data(channel: &FiraSecureChannel) -> Result<Vec<u8>> {
    let response = channel.send_local_fira_command(CommandApdu::get_do(&TAG_SESSION_DATA.to_be_bytes()))?;
    response.require_success()?;
    Ok(response.data)
}

/// Commits session data to our own local applet (the "commit locally"
/// path).
pub fn commit_local_session_data(channel: &FiraSecureChannel, data: &[u8]) -> Result<()> {
    let response = channel.send_local_fira_command(CommandApdu::put_do(&TAG_SESSION_DATA.to_be_bytes(), data))?;
    response.require_success()
}

/// Fetches the remote controlee info from our own local applet, used by
/// the controller-initiator variant.
pub fn fetch_local_controlee_info(channel: &FiraSecureChannel) -> Result<Vec<u8>> {
    let response = channel.send_local_fira_command(CommandApdu::get_do(&TAG_CONTROLEE_INFO.to_be_bytes()))?;
    response.require_success()?;
    Ok(response.data)
}

pub fn established_channel(channel: &Arc<FiraSecureChannel>) -> Result<()> {
    if channel.is_established() {
        Ok(())
    } else {
        Err(Error::Protocol("secure channel not yet established".into()))
    }
}

//! # session
//!
//! UWB session manager (spec §4.I): owns sessions keyed by opaque
//! session-handle, drives per-session state (`INIT`→`IDLE`→`ACTIVE`→
//! `DEINIT`), and forwards parsed UCI ranging notifications upward,
//! optionally through the AoA correction engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};

use uwb_types::{
    ClientId, DeviceRole, PeerAddress, ProtocolFamily, RangingChangeReason, RangingMeasurement, RangingReport,
    RangingRole, RangingStatus, SessionHandle, SessionState, UciSessionId,
};

use crate::adapter::Adapter;
use crate::aoa::AoaEngine;
use crate::error::{Error, Result};
use crate::uci::{close_reason_for_status, AppConfigParam, UciCommand, UciHal, UciNotification, UciSessionState};

const OPEN_TIMEOUT: Duration = Duration::from_millis(3000);
const START_TIMEOUT: Duration = Duration::from_millis(3000);
const CLOSE_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct OpenRangingParams {
    pub device_role: DeviceRole,
    pub ranging_role: RangingRole,
    pub protocol_family: ProtocolFamily,
    pub peers: Vec<PeerAddress>,
    pub app_config: Vec<AppConfigParam>,
}

struct SessionRecord {
    handle: SessionHandle,
    session_id: UciSessionId,
    client: ClientId,
    state: SessionState,
    peers: Vec<PeerAddress>,
    aoa_engine: Option<Mutex<AoaEngine>>,
}

/// Callback sink a session forwards ranging reports and closure events
/// to. A weak, non-owning handle on the session record side avoids the
/// session/callback/liveness-token cycle called out in the Design Notes.
pub trait SessionCallback: Send + Sync {
    fn on_ranging_data(&self, report: RangingReport);
    fn on_ranging_closed(&self, handle: SessionHandle, reason: RangingChangeReason);
}

struct SessionEntry {
    record: SessionRecord,
    callback: Arc<dyn SessionCallback>,
}

pub struct SessionManager {
    hal: Arc<dyn UciHal>,
    adapter: Arc<Adapter>,
    max_concurrent_sessions: usize,
    sessions: Mutex<HashMap<SessionHandle, SessionEntry>>,
    next_uci_session_id: Mutex<u32>,
}

impl SessionManager {
    pub fn new(hal: Arc<dyn UciHal>, adapter: Arc<Adapter>, max_concurrent_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            hal,
            adapter,
            max_concurrent_sessions,
            sessions: Mutex::new(HashMap::new()),
            next_uci_session_id: Mutex::new(1),
        })
    }

    fn allocate_uci_session_id(&self) -> UciSessionId {
        let mut next = self.next_uci_session_id.lock().unwrap();
        let id = *next;
        *next += 1;
        UciSessionId(id)
    }

    /// Parses params, allocates a session id, issues `SESSION_INIT` and
    /// app-config, transitions `INIT`→`IDLE` on success.
    pub async fn open_ranging(
        &self,
        client: ClientId,
        callback: Arc<dyn SessionCallback>,
        params: OpenRangingParams,
    ) -> Result<SessionHandle> {
        if !self.adapter.is_enabled() {
            return Err(Error::SystemPolicy("adapter not enabled".into()));
        }
        {
            let sessions = self.sessions.lock().unwrap();
            if sessions.len() >= self.max_concurrent_sessions {
                return Err(Error::Resource(format!(
                    "max concurrent sessions ({}) reached",
                    self.max_concurrent_sessions
                )));
            }
        }

        let handle = SessionHandle::new();
        let session_id = self.allocate_uci_session_id();

        self.hal.send_command(UciCommand::SessionInit { session_id })?;
        self.await_session_status(session_id, OPEN_TIMEOUT).await?;

        let mut app_config = core_app_config(params.device_role, params.ranging_role, params.protocol_family);
        app_config.extend(params.app_config.iter().cloned());
        self.hal.send_command(UciCommand::SetAppConfig { session_id, params: app_config })?;

        let record = SessionRecord {
            handle,
            session_id,
            client,
            state: SessionState::Idle,
            peers: params.peers,
            aoa_engine: None,
        };
        self.sessions.lock().unwrap().insert(
            handle,
            SessionEntry {
                record,
                callback,
            },
        );
        info!(%handle, session_id = session_id.0, "ranging session opened");
        Ok(handle)
    }

    /// Issues `RANGE_START`; transitions `IDLE`→`ACTIVE` on status
    /// notification.
    pub async fn start(&self, handle: SessionHandle) -> Result<()> {
        let session_id = self.require_state(handle, SessionState::Idle)?;
        self.hal.send_command(UciCommand::RangeStart { session_id })?;
        self.await_session_status(session_id, START_TIMEOUT).await?;
        self.set_state(handle, SessionState::Active)?;
        Ok(())
    }

    /// TLV-encodes a new parameter set; only permitted while `IDLE` or
    /// `ACTIVE`.
    pub fn reconfigure(&self, handle: SessionHandle, params: Vec<AppConfigParam>) -> Result<()> {
        let sessions = self.sessions.lock().unwrap();
        let entry = sessions.get(&handle).ok_or(Error::NoSuchSession(handle))?;
        if !matches!(entry.record.state, SessionState::Idle | SessionState::Active) {
            return Err(Error::Parameter(format!(
                "reconfigure only valid in IDLE/ACTIVE, session is {}",
                entry.record.state
            )));
        }
        let session_id = entry.record.session_id;
        drop(sessions);
        self.hal.send_command(UciCommand::SetAppConfig { session_id, params })
    }

    /// `RANGE_STOP`; expects `ACTIVE`→`IDLE`.
    pub async fn stop(&self, handle: SessionHandle) -> Result<()> {
        let session_id = self.require_state(handle, SessionState::Active)?;
        self.hal.send_command(UciCommand::RangeStop { session_id })?;
        self.set_state(handle, SessionState::Idle)?;
        Ok(())
    }

    /// `SESSION_DEINIT`; terminal.
    pub async fn close(&self, handle: SessionHandle, reason: RangingChangeReason) -> Result<()> {
        let (session_id, callback) = {
            let sessions = self.sessions.lock().unwrap();
            let entry = sessions.get(&handle).ok_or(Error::NoSuchSession(handle))?;
            (entry.record.session_id, entry.callback.clone())
        };
        self.hal.send_command(UciCommand::SessionDeinit { session_id })?;
        match timeout(CLOSE_TIMEOUT, self.await_session_status(session_id, CLOSE_TIMEOUT)).await {
            Ok(Ok(())) => {}
            _ => warn!(%handle, "close-notify timed out; closing locally"),
        }
        self.sessions.lock().unwrap().remove(&handle);
        callback.on_ranging_closed(handle, reason);
        Ok(())
    }

    /// Closes every session owned by `client` with reason `Unknown`,
    /// matching the client-death scenario (spec §8 scenario 6): active
    /// sessions are stopped then closed, idle sessions closed directly.
    pub async fn close_all_for_client(&self, client: ClientId) {
        let handles: Vec<(SessionHandle, bool)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .filter(|e| e.record.client == client)
                .map(|e| (e.record.handle, e.record.state == SessionState::Active))
                .collect()
        };
        for (handle, was_active) in handles {
            if was_active {
                if let Err(e) = self.stop(handle).await {
                    warn!(%handle, error = %e, "stop during client-death cleanup failed, closing anyway");
                }
            }
            if let Err(e) = self.close(handle, RangingChangeReason::Unknown).await {
                error!(%handle, error = %e, "close during client-death cleanup failed");
            }
        }
    }

    /// `send-vendor-uci-message` (spec §6): forwards an opaque
    /// vendor-group/opcode payload directly to the HAL.
    pub fn send_vendor_message(&self, gid: u8, oid: u8, payload: Vec<u8>) -> Result<()> {
        self.hal.send_command(UciCommand::VendorMessage { gid, oid, payload })
    }

    /// Enables per-session AoA correction, replacing raw measurements
    /// with the filtered output of an [`AoaEngine`].
    pub fn enable_aoa_correction(&self, handle: SessionHandle, engine: AoaEngine) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&handle).ok_or(Error::NoSuchSession(handle))?;
        entry.record.aoa_engine = Some(Mutex::new(engine));
        Ok(())
    }

    /// Drains and dispatches queued HAL notifications. Intended to be
    /// polled from the owning service task's loop (spec §5).
    pub fn pump_notifications(&self) {
        while let Some(notification) = self.hal.poll_notification() {
            if let Err(e) = self.handle_notification(notification) {
                error!(error = %e, "failed to handle UCI notification; session unaffected");
            }
        }
    }

    fn handle_notification(&self, notification: UciNotification) -> Result<()> {
        match notification {
            UciNotification::SessionStatus { .. } => Ok(()),
            UciNotification::RangeData { session_id, raw_measurements } => {
                self.on_range_data_ntf(session_id, &raw_measurements)
            }
            UciNotification::DeviceStatus { .. } => Ok(()),
        }
    }

    /// Parses a `RANGE_DATA_NTF` payload and forwards a [`RangingReport`]
    /// to the owning session's callback, optionally through the AoA
    /// engine (spec §4.I "Ranging-notification path").
    fn on_range_data_ntf(&self, session_id: UciSessionId, raw: &[u8]) -> Result<()> {
        let mut measurements = decode_range_data(raw)?;
        let sessions = self.sessions.lock().unwrap();
        let entry = match sessions.values().find(|e| e.record.session_id == session_id) {
            Some(e) => e,
            None => return Ok(()),
        };
        if entry.record.state != SessionState::Active {
            return Ok(());
        }

        if let Some(engine) = &entry.record.aoa_engine {
            let mut engine = engine.lock().unwrap();
            measurements = measurements
                .into_iter()
                .map(|m| apply_aoa_correction(&mut engine, m))
                .collect();
        }

        let report = RangingReport {
            session: entry.record.handle,
            epoch_ms: now_millis(),
            measurements,
        };
        entry.callback.on_ranging_data(report);
        Ok(())
    }

    fn require_state(&self, handle: SessionHandle, expected: SessionState) -> Result<UciSessionId> {
        let sessions = self.sessions.lock().unwrap();
        let entry = sessions.get(&handle).ok_or(Error::NoSuchSession(handle))?;
        if entry.record.state != expected {
            return Err(Error::Parameter(format!(
                "expected session in {expected}, found {}",
                entry.record.state
            )));
        }
        Ok(entry.record.session_id)
    }

    fn set_state(&self, handle: SessionHandle, next: SessionState) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&handle).ok_or(Error::NoSuchSession(handle))?;
        if !entry.record.state.can_transition_to(next) {
            return Err(Error::Protocol(format!(
                "illegal session transition {} -> {next}",
                entry.record.state
            )));
        }
        entry.record.state = next;
        Ok(())
    }

    /// Waits up to `bound` for any status notification on `session_id`.
    /// On timeout, synthesises a close with reason `Unknown` (spec §4.I
    /// "Timeouts").
    async fn await_session_status(&self, session_id: UciSessionId, bound: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            if let Some(UciNotification::SessionStatus { session_id: sid, status, .. }) = self.hal.poll_notification()
            {
                if sid == session_id {
                    return match status {
                        crate::uci::UciStatusCode::Ok => Ok(()),
                        other => Err(Error::Protocol(format!(
                            "session {} status {:?} (would close as {:?})",
                            session_id.0,
                            other,
                            close_reason_for_status(other)
                        ))),
                    };
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!("no status notification for session {}", session_id.0)));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

const APP_CONFIG_TAG_DEVICE_ROLE: u8 = 0x00;
const APP_CONFIG_TAG_RANGING_ROLE: u8 = 0x01;
const APP_CONFIG_TAG_PROTOCOL_FAMILY: u8 = 0x02;

fn core_app_config(
    device_role: DeviceRole,
    ranging_role: RangingRole,
    protocol_family: ProtocolFamily,
) -> Vec<AppConfigParam> {
    vec![
        AppConfigParam::new(APP_CONFIG_TAG_DEVICE_ROLE, vec![device_role as u8]),
        AppConfigParam::new(APP_CONFIG_TAG_RANGING_ROLE, vec![ranging_role as u8]),
        AppConfigParam::new(APP_CONFIG_TAG_PROTOCOL_FAMILY, vec![protocol_family as u8]),
    ]
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Feeds a decoded measurement through a per-session [`AoaEngine`],
/// replacing its angle/distance fields with the filtered result. Leaves
/// non-`Ok` or not-yet-converged measurements untouched.
fn apply_aoa_correction(engine: &mut AoaEngine, measurement: uwb_types::RangingMeasurement) -> uwb_types::RangingMeasurement {
    if !measurement.is_usable() {
        return measurement;
    }
    let Some(distance_cm) = measurement.distance_cm else { return measurement };
    let spherical = crate::aoa::SphericalMeasurement {
        azimuth_rad: measurement.aoa_azimuth_rad,
        elevation_rad: measurement.aoa_elevation_rad,
        distance_cm: distance_cm as f64,
        fom: measurement.aoa_azimuth_fom.unwrap_or(0) as f64,
        instant: std::time::Instant::now(),
    };
    let peer = measurement.peer.clone();
    match engine.process(spherical, None) {
        Ok(Some(())) => engine.to_measurement(peer).unwrap_or(measurement),
        _ => measurement,
    }
}

fn decode_q9_7_to_radians(raw: i16) -> f64 {
    (raw as f64 / 128.0).to_radians()
}

/// Decodes a `RANGE_DATA_NTF` payload: 1 byte peer count, then per peer
/// `[addr_len][addr][status][distance:4][az:2][az_fom:1][el:2][el_fom:1]
/// [los:1][rssi:2][slot:1][seq:1]` when status is `Ok`, or just
/// `[addr_len][addr][status]` when not.
fn decode_range_data(raw: &[u8]) -> Result<Vec<RangingMeasurement>> {
    if raw.is_empty() {
        return Err(Error::Protocol("empty RANGE_DATA_NTF".into()));
    }
    let count = raw[0] as usize;
    let mut cursor = 1usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let addr_len = *raw.get(cursor).ok_or_else(|| Error::Protocol("truncated RANGE_DATA_NTF".into()))? as usize;
        cursor += 1;
        let addr = raw
            .get(cursor..cursor + addr_len)
            .ok_or_else(|| Error::Protocol("truncated peer address".into()))?
            .to_vec();
        cursor += addr_len;
        let status_byte = *raw.get(cursor).ok_or_else(|| Error::Protocol("truncated status".into()))?;
        cursor += 1;
        let status = if status_byte == 0 { RangingStatus::Ok } else { RangingStatus::Error };

        if status != RangingStatus::Ok {
            out.push(RangingMeasurement {
                peer: PeerAddress(addr),
                status,
                distance_cm: None,
                aoa_azimuth_rad: None,
                aoa_azimuth_fom: None,
                aoa_elevation_rad: None,
                aoa_elevation_fom: None,
                line_of_sight: None,
                rssi_dbm: None,
                slot_index: None,
                frame_seq_num: None,
            });
            continue;
        }

        let field = |at: usize, len: usize| -> Result<&[u8]> {
            raw.get(at..at + len).ok_or_else(|| Error::Protocol("truncated measurement field".into()))
        };
        let distance_cm = u32::from_be_bytes(field(cursor, 4)?.try_into().unwrap());
        cursor += 4;
        let az_raw = i16::from_be_bytes(field(cursor, 2)?.try_into().unwrap());
        cursor += 2;
        let az_fom = field(cursor, 1)?[0];
        cursor += 1;
        let el_raw = i16::from_be_bytes(field(cursor, 2)?.try_into().unwrap());
        cursor += 2;
        let el_fom = field(cursor, 1)?[0];
        cursor += 1;
        let los = field(cursor, 1)?[0] != 0;
        cursor += 1;
        let rssi = i16::from_be_bytes(field(cursor, 2)?.try_into().unwrap());
        cursor += 2;
        let slot_index = field(cursor, 1)?[0];
        cursor += 1;
        let frame_seq_num = field(cursor, 1)?[0];
        cursor += 1;

        out.push(RangingMeasurement {
            peer: PeerAddress(addr),
            status,
            distance_cm: Some(distance_cm),
            aoa_azimuth_rad: Some(decode_q9_7_to_radians(az_raw)),
            aoa_azimuth_fom: Some(az_fom),
            aoa_elevation_rad: Some(decode_q9_7_to_radians(el_raw)),
            aoa_elevation_fom: Some(el_fom),
            line_of_sight: Some(los),
            rssi_dbm: Some(rssi),
            slot_index: Some(slot_index),
            frame_seq_num: Some(frame_seq_num),
        });
    }
    Ok(out)
}

//! # uwb-types
//!
//! Shared data model for the UWB ranging core.
//!
//! These types are used by:
//! - `uwb-core`: the session/adapter lifecycle manager, secure channel, AoA
//!   pipeline and BLE-GATT transport.
//! - `uwb-hal-sim`: a HAL/UCI stand-in used for integration tests and local
//!   development, never the real radio driver.
//!
//! ## Coordinate conventions
//!
//! - **Pose frame**: "+Y up, −Z forward" per the FiRa/UWB pose convention.
//! - **Spherical measurement frame**: azimuth is signed left/right from
//!   forward, elevation is signed up/down from the horizontal plane.
//!
//! ## Invariants
//! - If a ranging measurement's status is not `Ok`, every optional field is
//!   `None`.
//! - A measurement with `aoa_azimuth_fom == 0` must be discarded upstream —
//!   see [`RangingMeasurement::is_usable`].
//! - `distance_cm` is never negative.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Opaque identifiers ───────────────────────────────────────────────────────

/// Opaque, process-unique client attribution. Sessions opened by the same
/// client share a `ClientId`; client death closes every session with that id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, process-unique session handle the client holds. 1:1 with a
/// `SessionRecord` inside the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub uuid::Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The radio's own numeric session id (UCI `Session_ID`), distinct from the
/// client-facing [`SessionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UciSessionId(pub u32);

/// Identifies a UWB chip when more than one is attached. Addressing a named
/// chip is in scope; fleet management across many chips is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChipId(pub String);

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer's UWB MAC address (2-byte short or 8-byte extended, carried as raw
/// bytes since this crate never interprets address allocation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(pub Vec<u8>);

// ── Session data model (§3, §4.I) ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    Controller,
    Controlee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingRole {
    Initiator,
    Responder,
}

/// Protocol family tag carried on every session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolFamily {
    Fira,
    Ccc,
    Other,
}

/// `INIT → IDLE → ACTIVE → IDLE → DEINIT`. ACTIVE is the only state in which
/// ranging notifications may be produced; IDLE is the only state accepting
/// reconfigure; DEINIT is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Init,
    Idle,
    Active,
    Deinit,
}

impl SessionState {
    /// Whether `next` is a legal transition from `self`, per the state
    /// monotonicity invariant (§8): the published sequence is a prefix of
    /// `INIT, IDLE, ACTIVE*, IDLE*, DEINIT`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Idle) | (Idle, Active) | (Active, Idle) | (Idle, Deinit) | (Active, Deinit)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Init => "INIT",
            SessionState::Idle => "IDLE",
            SessionState::Active => "ACTIVE",
            SessionState::Deinit => "DEINIT",
        };
        write!(f, "{s}")
    }
}

/// `DISABLED | ENABLED_INACTIVE | ENABLED_ACTIVE`, derived from the chip's
/// `DEVICE_STATUS` plus the global toggle and airplane-mode gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Disabled,
    EnabledInactive,
    EnabledActive,
}

/// Why an adapter-state transition occurred, so observers can
/// distinguish a user toggle from airplane mode from a HAL failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterStateReason {
    UserToggle,
    AirplaneMode,
    HalStatus,
    SystemPolicy,
}

/// Closed enum surfaced on every stop/close (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingChangeReason {
    Unknown,
    LocalApi,
    MaxSessionsReached,
    SystemPolicy,
    RemoteRequest,
    ProtocolSpecific,
    BadParameters,
    MaxRrRetryReached,
    InsufficientSlotsPerRr,
    SystemRegulation,
    SessionSuspended,
    SessionResumed,
    InbandSessionStop,
}

// ── Ranging measurement (§3) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingStatus {
    Ok,
    Error,
}

/// One peer's result for a single ranging epoch.
///
/// Invariant: if `status != Ok`, every `Option` field below is `None`.
/// Invariant: `distance_cm` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingMeasurement {
    pub peer: PeerAddress,
    pub status: RangingStatus,
    pub distance_cm: Option<u32>,
    /// Azimuth in radians, decoded from Q9.7 fixed point on the wire.
    pub aoa_azimuth_rad: Option<f64>,
    pub aoa_azimuth_fom: Option<u8>,
    /// Elevation in radians, decoded from Q9.7 fixed point on the wire.
    pub aoa_elevation_rad: Option<f64>,
    pub aoa_elevation_fom: Option<u8>,
    pub line_of_sight: Option<bool>,
    pub rssi_dbm: Option<i16>,
    pub slot_index: Option<u8>,
    pub frame_seq_num: Option<u8>,
}

impl RangingMeasurement {
    /// A reading with `aoa_azimuth_fom == 0` must be discarded upstream.
    pub fn is_usable(&self) -> bool {
        self.status == RangingStatus::Ok && self.aoa_azimuth_fom.map_or(true, |f| f != 0)
    }
}

/// One epoch's worth of measurements, surfaced to the client (optionally
/// after passing through the AoA correction engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangingReport {
    pub session: SessionHandle,
    pub epoch_ms: u64,
    pub measurements: Vec<RangingMeasurement>,
}

// ── Pose (§3, §4.B, §4.C) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// Unit quaternion, `(x, y, z, w)` layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl Quat {
    /// Quaternion representing a pure rotation about the X axis (pitch) by
    /// `angle_rad`. Used to rotate sensor frames ("+Z up") into the pose
    /// convention used throughout this crate ("+Y up").
    pub fn from_pitch(angle_rad: f64) -> Self {
        let half = angle_rad / 2.0;
        Self { x: half.sin(), y: 0.0, z: 0.0, w: half.cos() }
    }

    pub fn conjugate(&self) -> Self {
        Self { x: -self.x, y: -self.y, z: -self.z, w: self.w }
    }

    pub fn mul(&self, rhs: &Quat) -> Quat {
        Quat {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    pub fn rotate_vec3(&self, v: Vec3) -> Vec3 {
        let qv = Quat { x: v.x, y: v.y, z: v.z, w: 0.0 };
        let r = self.mul(&qv).mul(&self.conjugate());
        Vec3::new(r.x, r.y, r.z)
    }
}

/// Immutable pose snapshot: translation + rotation. Poses are ordered by
/// arrival time, not by any field of the struct itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose =
        Pose { translation: Vec3::ZERO, rotation: Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 } };
}

/// Capability set a pose source declares. `Upright` asserts absolute (not
/// relative) pitch/roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseCapability {
    Yaw,
    Pitch,
    Roll,
    X,
    Y,
    Z,
    Upright,
}

// ── FiRa Connector wire types (§3, §4.D) ─────────────────────────────────────

/// Reserved SECIDs: 0 and 1 are reserved, legal range is 2..=127.
pub const SECID_MIN: u8 = 2;
pub const SECID_MAX: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorMessageType {
    Command,
    Event,
    CommandRespond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorInstructionCode {
    DataExchange,
    ErrorIndication,
    CapabilitiesExchange,
}

/// Negotiated per session (§3 "Connector capabilities").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorCapabilities {
    pub optimized_data_packet_size: u16,
    pub max_message_buffer_size: u32,
    pub secure_components: Vec<SecureComponentDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureComponentDescriptor {
    pub secid: u8,
    pub component_type: String,
    pub protocol: String,
}

// ── Supplemented client-surface data (§6.1) ──────────────────────────────────

/// Static capability descriptor for a chip, returned by
/// `get-specification-info`/`get-chip-infos` (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificationInfo {
    pub fira_phy_version: String,
    pub fira_mac_version: String,
    pub supported_protocol_families: Vec<ProtocolFamily>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipInfo {
    pub chip_id: ChipId,
    pub spec_info: SpecificationInfo,
}

/// An opaque, client-provisioned ranging profile (spec §6
/// add/remove/get-all-service-profile). The protocol-specific contents are
/// carried as raw bytes, the same "opaque parameter bundle" treatment the
/// spec gives every client-API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub id: uuid::Uuid,
    pub params: Vec<u8>,
}

// ── BER-TLV well-known tags (§4.F) ───────────────────────────────────────────

pub const TAG_CONTROLEE_INFO: u16 = 0xBF70;
pub const TAG_SESSION_DATA: u16 = 0xBF78;
pub const TAG_TERMINATION: u16 = 0xBF79;
pub const TAG_DISPATCH_RESPONSE: u16 = 0x71;
pub const TAG_NOTIFICATION: u16 = 0xE1;
pub const TAG_OUTBOUND_KIND: u16 = 0x80;
pub const TAG_STATUS_WORD: u16 = 0x81;
pub const TAG_PAYLOAD: u16 = 0x82;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_monotonicity() {
        use SessionState::*;
        assert!(Init.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Active));
        assert!(Active.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Deinit));
        assert!(Active.can_transition_to(Deinit));
        assert!(!Init.can_transition_to(Active));
        assert!(!Deinit.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Init));
    }

    #[test]
    fn measurement_usability() {
        let mut m = RangingMeasurement {
            peer: PeerAddress(vec![1, 2]),
            status: RangingStatus::Ok,
            distance_cm: Some(100),
            aoa_azimuth_rad: Some(0.1),
            aoa_azimuth_fom: Some(0),
            aoa_elevation_rad: None,
            aoa_elevation_fom: None,
            line_of_sight: Some(true),
            rssi_dbm: Some(-70),
            slot_index: Some(0),
            frame_seq_num: Some(1),
        };
        assert!(!m.is_usable(), "fom=0 must be discarded upstream");
        m.aoa_azimuth_fom = Some(10);
        assert!(m.is_usable());
        m.status = RangingStatus::Error;
        assert!(!m.is_usable());
    }

    #[test]
    fn quat_rotate_identity() {
        let q = Quat::default();
        let v = Vec3::new(1.0, 2.0, 3.0);
        let r = q.rotate_vec3(v);
        assert!((r.x - v.x).abs() < 1e-9);
        assert!((r.y - v.y).abs() < 1e-9);
        assert!((r.z - v.z).abs() < 1e-9);
    }
}

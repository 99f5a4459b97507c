//! `SimHal`: the in-process `UciHal` stand-in. Answers every
//! session/app-config/device command immediately with an `Ok` status
//! notification, and while a session is `RANGE_START`ed, spawns a
//! periodic task producing noised `RANGE_DATA_NTF` payloads for every
//! configured peer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tracing::info;

use uwb_core::error::Result;
use uwb_core::uci::{UciCommand, UciHal, UciNotification, UciSessionState, UciStatusCode};
use uwb_types::UciSessionId;

use crate::config::SimConfig;
use crate::noise::apply_noise;
use crate::wire::{encode_range_data_ntf, SimPeerReading};

struct ActiveSession {
    task: JoinHandle<()>,
}

pub struct SimHal {
    config: SimConfig,
    notifications: Arc<Mutex<VecDeque<UciNotification>>>,
    active: Mutex<HashMap<UciSessionId, ActiveSession>>,
    device_enabled: AtomicBool,
    next_frame_seq: AtomicU8,
}

impl SimHal {
    pub fn new(config: SimConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            notifications: Arc::new(Mutex::new(VecDeque::new())),
            active: Mutex::new(HashMap::new()),
            device_enabled: AtomicBool::new(false),
            next_frame_seq: AtomicU8::new(0),
        })
    }

    fn push(&self, notification: UciNotification) {
        self.notifications.lock().unwrap().push_back(notification);
    }

    fn push_session_status(&self, session_id: UciSessionId, state: UciSessionState) {
        self.push(UciNotification::SessionStatus { session_id, state, status: UciStatusCode::Ok });
    }

    fn spawn_ranging_loop(&self, session_id: UciSessionId) -> JoinHandle<()> {
        let notifications = self.notifications.clone();
        let peers = self.config.peers.clone();
        let noise = self.config.noise.clone();
        let period = Duration::from_secs_f64(1.0 / self.config.update_rate_hz.max(0.1));
        let frame_seq = self.next_frame_seq.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut interval = tokio::time::interval(period);
            let mut seq = frame_seq;
            loop {
                interval.tick().await;
                let readings: Vec<SimPeerReading> = peers
                    .iter()
                    .enumerate()
                    .map(|(slot, peer)| {
                        let noisy = apply_noise(
                            peer.true_distance_cm,
                            peer.true_azimuth_deg,
                            peer.true_elevation_deg,
                            &noise,
                            &mut rng,
                        );
                        SimPeerReading {
                            address: hex_decode(&peer.address_hex),
                            los: noisy.los,
                            distance_cm: noisy.distance_cm.round() as u32,
                            azimuth_deg: noisy.azimuth_deg,
                            elevation_deg: noisy.elevation_deg,
                            azimuth_fom: if noisy.los { 90 } else { 40 },
                            elevation_fom: if noisy.los { 85 } else { 35 },
                            rssi_dbm: -60,
                            slot_index: slot as u8,
                            frame_seq_num: seq,
                        }
                    })
                    .collect();
                seq = seq.wrapping_add(1);

                notifications.lock().unwrap().push_back(UciNotification::RangeData {
                    session_id,
                    raw_measurements: encode_range_data_ntf(&readings),
                });
            }
        })
    }
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

impl UciHal for SimHal {
    fn send_command(&self, command: UciCommand) -> Result<()> {
        match command {
            UciCommand::SessionInit { session_id } => {
                info!(session_id = session_id.0, "SESSION_INIT");
                self.push_session_status(session_id, UciSessionState::Idle);
            }
            UciCommand::SessionDeinit { session_id } => {
                info!(session_id = session_id.0, "SESSION_DEINIT");
                if let Some(session) = self.active.lock().unwrap().remove(&session_id) {
                    session.task.abort();
                }
                self.push_session_status(session_id, UciSessionState::Deinit);
            }
            UciCommand::SetAppConfig { session_id, .. } => {
                info!(session_id = session_id.0, "SESSION_SET_APP_CONFIG");
            }
            UciCommand::RangeStart { session_id } => {
                info!(session_id = session_id.0, "RANGE_START");
                let task = self.spawn_ranging_loop(session_id);
                self.active.lock().unwrap().insert(session_id, ActiveSession { task });
                self.push_session_status(session_id, UciSessionState::Active);
            }
            UciCommand::RangeStop { session_id } => {
                info!(session_id = session_id.0, "RANGE_STOP");
                if let Some(session) = self.active.lock().unwrap().remove(&session_id) {
                    session.task.abort();
                }
                self.push_session_status(session_id, UciSessionState::Idle);
            }
            UciCommand::SetDeviceEnabled { enabled } => {
                info!(enabled, "SET_DEVICE_ENABLED");
                self.device_enabled.store(enabled, Ordering::SeqCst);
                self.push(UciNotification::DeviceStatus { enabled });
            }
            UciCommand::VendorMessage { gid, oid, .. } => {
                info!(gid, oid, "VENDOR_MESSAGE (ignored by simulator)");
            }
        }
        Ok(())
    }

    fn poll_notification(&self) -> Option<UciNotification> {
        self.notifications.lock().unwrap().pop_front()
    }
}

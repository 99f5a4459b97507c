//! # client_api
//!
//! Supplemented concrete client surface (spec §6.1): binds a
//! [`SessionManager`] + [`Adapter`] pair behind the operation set named in
//! §6, for tests and `uwb-hal-sim`'s demo harness to drive directly. Not a
//! network-facing RPC surface — the real client-API shim is out of scope.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use uwb_types::{
    AdapterState, ChipId, ChipInfo, ProtocolFamily, RangingChangeReason, ServiceProfile, SpecificationInfo,
};

use crate::adapter::{Adapter, AdapterStateListener};
use crate::error::{Error, Result};
use crate::secure_channel::FiraSecureChannel;
use crate::session::{OpenRangingParams, SessionCallback, SessionManager};
use crate::uci::AppConfigParam;
use uwb_types::SessionHandle;

/// Fixed descriptor this repository's core reports for every chip in
/// response to `get-specification-info`.
fn specification_info() -> SpecificationInfo {
    SpecificationInfo {
        fira_phy_version: "2.0".into(),
        fira_mac_version: "2.0".into(),
        supported_protocol_families: vec![ProtocolFamily::Fira, ProtocolFamily::Ccc],
    }
}

/// Resolution of the monotonic clock the core timestamps ranging data
/// with (`std::time::Instant`), reported as nanoseconds to match the
/// unit in the client-facing operation name.
const TIMESTAMP_RESOLUTION_NS: u64 = 1;

pub struct ClientApi {
    adapter: Arc<Adapter>,
    sessions: Arc<SessionManager>,
    service_profiles: Mutex<HashMap<uuid::Uuid, ServiceProfile>>,
    provisioned_adfs: Mutex<Vec<Vec<u8>>>,
    data_channels: Mutex<HashMap<SessionHandle, Arc<FiraSecureChannel>>>,
}

impl ClientApi {
    pub fn new(adapter: Arc<Adapter>, sessions: Arc<SessionManager>) -> Self {
        Self {
            adapter,
            sessions,
            service_profiles: Mutex::new(HashMap::new()),
            provisioned_adfs: Mutex::new(Vec::new()),
            data_channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_adapter_callback(&self, listener: Arc<dyn AdapterStateListener>) {
        self.adapter.register_adapter_state_callback(listener);
    }

    pub fn unregister_adapter_callback(&self, listener: &Arc<dyn AdapterStateListener>) {
        self.adapter.unregister_adapter_state_callback(listener);
    }

    pub fn get_chip_ids(&self) -> Vec<ChipId> {
        vec![self.adapter.chip_id().clone()]
    }

    pub fn get_default_chip_id(&self) -> ChipId {
        self.adapter.chip_id().clone()
    }

    pub fn get_adapter_state(&self) -> AdapterState {
        self.adapter.get_adapter_state()
    }

    pub fn get_specification_info(&self, _chip_id: &ChipId) -> SpecificationInfo {
        specification_info()
    }

    pub fn get_timestamp_resolution_ns(&self, _chip_id: &ChipId) -> u64 {
        TIMESTAMP_RESOLUTION_NS
    }

    pub fn get_chip_infos(&self) -> Vec<ChipInfo> {
        vec![ChipInfo { chip_id: self.adapter.chip_id().clone(), spec_info: specification_info() }]
    }

    /// Opaque ranging-profile bookkeeping (spec §6
    /// add/remove/get-all-service-profile); params are never interpreted
    /// by this layer.
    pub fn add_service_profile(&self, params: Vec<u8>) -> uuid::Uuid {
        let profile = ServiceProfile { id: uuid::Uuid::new_v4(), params };
        let id = profile.id;
        self.service_profiles.lock().unwrap().insert(id, profile);
        id
    }

    pub fn remove_service_profile(&self, id: uuid::Uuid) -> Result<()> {
        self.service_profiles
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::Parameter(format!("no such service profile {id}")))
    }

    pub fn get_all_service_profiles(&self) -> Vec<ServiceProfile> {
        self.service_profiles.lock().unwrap().values().cloned().collect()
    }

    /// Records a provisioned applet-domain-file identifier. Running the
    /// script against the secure element itself is the job of the
    /// `secure_channel`/`secure_session` state machines; this bookkeeping
    /// layer only tracks which ADFs a client believes are live.
    pub fn provision_adf_by_script(&self, _chip_id: &ChipId, script: Vec<u8>) -> Result<()> {
        self.provisioned_adfs.lock().unwrap().push(script);
        Ok(())
    }

    pub fn remove_adf(&self, adf_oid: &[u8]) -> Result<()> {
        let mut adfs = self.provisioned_adfs.lock().unwrap();
        let before = adfs.len();
        adfs.retain(|a| a != adf_oid);
        if adfs.len() == before {
            return Err(Error::Parameter("no such provisioned ADF".into()));
        }
        Ok(())
    }

    pub fn send_vendor_uci_message(&self, gid: u8, oid: u8, payload: Vec<u8>) -> Result<()> {
        self.sessions.send_vendor_message(gid, oid, payload)
    }

    /// Associates a session with the secure channel its data-transfer path
    /// rides on, so `send_data` has somewhere to forward to.
    pub fn register_data_channel(&self, handle: SessionHandle, channel: Arc<FiraSecureChannel>) {
        self.data_channels.lock().unwrap().insert(handle, channel);
    }

    /// `send-data(peerAddr, payload)` (spec §6): forwarded over the
    /// session's registered secure channel. `peer` is accepted for
    /// interface fidelity but unused — a session's channel already
    /// targets a single remote device.
    pub fn send_data(&self, handle: SessionHandle, _peer: uwb_types::PeerAddress, payload: &[u8]) -> Result<()> {
        let channel = self
            .data_channels
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or(Error::NoSuchSession(handle))?;
        channel.send_raw_data_to_remote(payload)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.adapter.set_enabled(enabled).await
    }

    pub async fn open_ranging(
        &self,
        client: uwb_types::ClientId,
        callback: Arc<dyn SessionCallback>,
        params: OpenRangingParams,
    ) -> Result<SessionHandle> {
        self.sessions.open_ranging(client, callback, params).await
    }

    pub async fn start(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.start(handle).await
    }

    pub fn reconfigure(&self, handle: SessionHandle, params: Vec<AppConfigParam>) -> Result<()> {
        self.sessions.reconfigure(handle, params)
    }

    /// `add-controlee`/`remove-controlee` are modelled as reconfigure calls
    /// carrying the controlee-list app-config tag (spec §6 client surface).
    pub fn add_controlee(&self, handle: SessionHandle, peer: uwb_types::PeerAddress) -> Result<()> {
        self.sessions.reconfigure(handle, vec![AppConfigParam::new(0x10, peer.0)])
    }

    pub fn remove_controlee(&self, handle: SessionHandle, peer: uwb_types::PeerAddress) -> Result<()> {
        self.sessions.reconfigure(handle, vec![AppConfigParam::new(0x11, peer.0)])
    }

    /// `pause`/`resume` are modelled as stop/start (spec §6: opaque
    /// parameter bundles with no literal pause/resume UCI command named).
    pub async fn pause(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.stop(handle).await
    }

    pub async fn resume(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.start(handle).await
    }

    pub async fn stop(&self, handle: SessionHandle) -> Result<()> {
        self.sessions.stop(handle).await
    }

    pub async fn close(&self, handle: SessionHandle, reason: RangingChangeReason) -> Result<()> {
        self.sessions.close(handle, reason).await
    }

    pub async fn close_all_for_client(&self, client: uwb_types::ClientId) {
        self.sessions.close_all_for_client(client).await
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::uci::{UciCommand, UciHal, UciNotification};
    use std::sync::Mutex;
    use uwb_types::{DeviceRole, ProtocolFamily, RangingReport, RangingRole};

    struct FakeHal {
        pending: Mutex<Vec<UciNotification>>,
    }
    impl UciHal for FakeHal {
        fn send_command(&self, _command: UciCommand) -> Result<()> {
            Ok(())
        }
        fn poll_notification(&self) -> Option<UciNotification> {
            self.pending.lock().unwrap().pop()
        }
    }

    fn ok_status(session_id: uwb_types::UciSessionId) -> UciNotification {
        UciNotification::SessionStatus {
            session_id,
            state: crate::uci::UciSessionState::Idle,
            status: crate::uci::UciStatusCode::Ok,
        }
    }

    struct NullCallback;
    impl SessionCallback for NullCallback {
        fn on_ranging_data(&self, _report: RangingReport) {}
        fn on_ranging_closed(&self, _handle: SessionHandle, _reason: RangingChangeReason) {}
    }

    #[tokio::test]
    async fn open_then_close_round_trip() {
        let hal_impl = Arc::new(FakeHal {
            pending: Mutex::new(vec![ok_status(uwb_types::UciSessionId(1)), ok_status(uwb_types::UciSessionId(1))]),
        });
        let hal: Arc<dyn UciHal> = hal_impl;
        let config = AdapterConfig::default();
        let adapter = Adapter::boot(hal.clone(), ChipId("chip0".into()), &config);
        let sessions = SessionManager::new(hal, adapter.clone(), config.max_concurrent_sessions);
        let api = ClientApi::new(adapter, sessions);

        let handle = api
            .open_ranging(
                uwb_types::ClientId::new(),
                Arc::new(NullCallback),
                OpenRangingParams {
                    device_role: DeviceRole::Controller,
                    ranging_role: RangingRole::Initiator,
                    protocol_family: ProtocolFamily::Fira,
                    peers: vec![],
                    app_config: vec![],
                },
            )
            .await
            .unwrap();
        api.close(handle, RangingChangeReason::LocalApi).await.unwrap();
    }

    #[tokio::test]
    async fn service_profile_and_adf_bookkeeping_round_trips() {
        let hal: Arc<dyn UciHal> = Arc::new(FakeHal { pending: Mutex::new(vec![]) });
        let config = AdapterConfig::default();
        let adapter = Adapter::boot(hal.clone(), ChipId("chip0".into()), &config);
        let sessions = SessionManager::new(hal, adapter.clone(), config.max_concurrent_sessions);
        let api = ClientApi::new(adapter, sessions);

        let id = api.add_service_profile(vec![0xAA]);
        assert_eq!(api.get_all_service_profiles().len(), 1);
        api.remove_service_profile(id).unwrap();
        assert!(api.get_all_service_profiles().is_empty());
        assert!(api.remove_service_profile(id).is_err());

        api.provision_adf_by_script(&ChipId("chip0".into()), vec![0x01, 0x02]).unwrap();
        assert!(api.remove_adf(&[0x01, 0x02]).is_ok());
        assert!(api.remove_adf(&[0x01, 0x02]).is_err());
    }
}

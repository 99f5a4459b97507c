//! main.rs — UWB HAL simulator + demo harness
//!
//! Wires the in-process `SimHal` to `uwb-core`'s `Adapter` and
//! `SessionManager` behind a `ClientApi`, opens one ranging session
//! against every peer named in `config.toml`, and logs each
//! `RangingReport` as it arrives.

mod config;
mod hal;
mod noise;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use uwb_core::adapter::Adapter;
use uwb_core::client_api::ClientApi;
use uwb_core::config::AdapterConfig;
use uwb_core::session::{OpenRangingParams, SessionCallback, SessionManager};
use uwb_types::{ChipId, ClientId, DeviceRole, ProtocolFamily, RangingChangeReason, RangingReport, RangingRole, SessionHandle};

use config::SimConfig;
use hal::SimHal;

#[derive(Parser, Debug)]
#[command(name = "uwb-hal-sim", about = "In-process UCI HAL stand-in and ranging demo harness")]
struct Args {
    /// Simulator config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// How long to run the demo session before closing it, in seconds
    #[arg(long, default_value = "5")]
    run_secs: u64,
}

struct LoggingCallback;

impl SessionCallback for LoggingCallback {
    fn on_ranging_data(&self, report: RangingReport) {
        for m in &report.measurements {
            info!(
                session = %report.session,
                peer = ?m.peer,
                distance_cm = ?m.distance_cm,
                azimuth_rad = ?m.aoa_azimuth_rad,
                los = ?m.line_of_sight,
                "ranging data"
            );
        }
    }

    fn on_ranging_closed(&self, handle: SessionHandle, reason: RangingChangeReason) {
        info!(%handle, ?reason, "ranging session closed");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uwb_hal_sim=info,uwb_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let sim_config = SimConfig::load(&args.config);
    info!(
        "📡 UWB HAL simulator starting — {} peer(s), {} Hz update rate",
        sim_config.peers.len(),
        sim_config.update_rate_hz
    );

    let hal = SimHal::new(sim_config);
    let adapter_config = AdapterConfig { persisted_toggle: true, ..AdapterConfig::from_env() };
    let adapter = Adapter::boot(hal.clone(), ChipId("sim-0".into()), &adapter_config);
    let sessions = SessionManager::new(hal, adapter.clone(), adapter_config.max_concurrent_sessions);
    let api = ClientApi::new(adapter, sessions);

    let client = ClientId::new();
    let handle = api
        .open_ranging(
            client,
            Arc::new(LoggingCallback),
            OpenRangingParams {
                device_role: DeviceRole::Controller,
                ranging_role: RangingRole::Initiator,
                protocol_family: ProtocolFamily::Fira,
                peers: vec![],
                app_config: vec![],
            },
        )
        .await
        .expect("failed to open ranging session against the simulated radio");

    api.start(handle).await.expect("failed to start ranging");
    info!(%handle, "ranging session active — streaming for {}s", args.run_secs);

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.run_secs);
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        api.sessions().pump_notifications();
    }

    api.close(handle, RangingChangeReason::LocalApi).await.expect("failed to close ranging session");
    info!("👋 UWB HAL simulator shutting down");
}

//! # adapter
//!
//! Adapter/service (spec §4.J): owns the global enable toggle and the
//! airplane-mode gate, replays the persisted toggle to the HAL on boot,
//! and protects every enable/disable with a watchdog that unconditionally
//! releases its wake token after a bounded interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};
use uwb_types::{AdapterState, AdapterStateReason, ChipId};

use crate::config::AdapterConfig;
use crate::error::Result;
use crate::uci::{UciCommand, UciHal};

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

pub trait AdapterStateListener: Send + Sync {
    fn on_adapter_state_changed(&self, state: AdapterState, reason: AdapterStateReason);
}

struct AdapterInner {
    user_toggle: bool,
    airplane_mode: bool,
    state: AdapterState,
}

/// A held watchdog wake token. Its `Drop` releases the token exactly
/// once, regardless of whether the HAL call it guards ever completes
/// (spec §8 "Watchdog release").
pub struct WakeToken {
    released: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Drop for WakeToken {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }
}

pub struct Adapter {
    hal: Arc<dyn UciHal>,
    chip: ChipId,
    inner: Mutex<AdapterInner>,
    listeners: Mutex<Vec<Arc<dyn AdapterStateListener>>>,
}

impl Adapter {
    /// Boots with the persisted toggle replayed to the HAL before any
    /// other call, per spec §4.J.
    pub fn boot(hal: Arc<dyn UciHal>, chip: ChipId, config: &AdapterConfig) -> Arc<Self> {
        let adapter = Arc::new(Self {
            hal,
            chip,
            inner: Mutex::new(AdapterInner {
                user_toggle: config.persisted_toggle,
                airplane_mode: config.airplane_mode,
                state: AdapterState::Disabled,
            }),
            listeners: Mutex::new(Vec::new()),
        });
        adapter.reassert_hal_state(AdapterStateReason::HalStatus);
        adapter
    }

    pub fn chip_id(&self) -> &ChipId {
        &self.chip
    }

    pub fn register_adapter_state_callback(&self, listener: Arc<dyn AdapterStateListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn unregister_adapter_state_callback(&self, listener: &Arc<dyn AdapterStateListener>) {
        self.listeners.lock().unwrap().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn get_adapter_state(&self) -> AdapterState {
        self.inner.lock().unwrap().state
    }

    pub fn is_enabled(&self) -> bool {
        self.get_adapter_state() == AdapterState::EnabledActive
            || self.get_adapter_state() == AdapterState::EnabledInactive
    }

    /// User-driven enable/disable. Airplane mode overrides this at the
    /// HAL level: toggling on while airplane mode is active does not
    /// re-enable the radio until airplane mode clears.
    pub async fn set_enabled(self: &Arc<Self>, enabled: bool) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.user_toggle = enabled;
        }
        self.reassert_hal_state(AdapterStateReason::UserToggle);
        Ok(())
    }

    /// Airplane-mode on forces the HAL-level toggle false even if the
    /// user toggle is true; toggling it off re-asserts the user toggle.
    pub async fn set_airplane_mode(self: &Arc<Self>, on: bool) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.airplane_mode = on;
        }
        self.reassert_hal_state(AdapterStateReason::AirplaneMode);
        Ok(())
    }

    /// Closes every session and disables the HAL with reason
    /// `SystemPolicy`/`SystemRegulation` (spec §7 "System-policy").
    pub fn force_system_policy_disable(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.user_toggle = false;
        }
        self.reassert_hal_state(AdapterStateReason::SystemPolicy);
    }

    fn reassert_hal_state(self: &Arc<Self>, reason: AdapterStateReason) {
        let desired_enabled = {
            let inner = self.inner.lock().unwrap();
            inner.user_toggle && !inner.airplane_mode
        };

        let _wake_token = self.spawn_watchdog();
        if let Err(e) = self.hal.send_command(UciCommand::SetDeviceEnabled { enabled: desired_enabled }) {
            warn!(error = %e, "HAL enable/disable command failed; treating as disabled");
        }

        let new_state = if desired_enabled {
            AdapterState::EnabledInactive
        } else {
            AdapterState::Disabled
        };
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let changed = inner.state != new_state;
            inner.state = new_state;
            changed
        };
        if changed {
            info!(chip = %self.chip, state = ?new_state, ?reason, "adapter state changed");
            let listeners = self.listeners.lock().unwrap().clone();
            for listener in listeners {
                listener.on_adapter_state_changed(new_state, reason);
            }
        }
    }

    /// Acquires a wake token and spawns the watchdog that releases it
    /// after `WATCHDOG_TIMEOUT` regardless of HAL behaviour.
    fn spawn_watchdog(self: &Arc<Self>) -> WakeToken {
        let released = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let token = WakeToken {
            released: released.clone(),
            notify: notify.clone(),
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(WATCHDOG_TIMEOUT) => {
                    released.store(true, Ordering::SeqCst);
                }
            }
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeHal {
        enabled_calls: Mutex<Vec<bool>>,
    }

    impl FakeHal {
        fn new() -> Self {
            Self { enabled_calls: Mutex::new(Vec::new()) }
        }
    }

    impl UciHal for FakeHal {
        fn send_command(&self, command: UciCommand) -> Result<()> {
            if let UciCommand::SetDeviceEnabled { enabled } = command {
                self.enabled_calls.lock().unwrap().push(enabled);
            }
            Ok(())
        }
        fn poll_notification(&self) -> Option<crate::uci::UciNotification> {
            None
        }
    }

    struct CountingListener(Arc<AtomicUsize>);
    impl AdapterStateListener for CountingListener {
        fn on_adapter_state_changed(&self, _state: AdapterState, _reason: AdapterStateReason) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn boot_with_airplane_mode_disables_before_any_open() {
        let hal = Arc::new(FakeHal::new());
        let config = AdapterConfig {
            persisted_toggle: true,
            airplane_mode: true,
            ..AdapterConfig::default()
        };
        let adapter = Adapter::boot(hal.clone(), ChipId("chip0".into()), &config);
        assert_eq!(adapter.get_adapter_state(), AdapterState::Disabled);
        assert_eq!(hal.enabled_calls.lock().unwrap().as_slice(), &[false]);

        adapter.set_airplane_mode(false).await.unwrap();
        assert_eq!(adapter.get_adapter_state(), AdapterState::EnabledInactive);
        assert_eq!(hal.enabled_calls.lock().unwrap().as_slice(), &[false, true]);
    }

    #[tokio::test]
    async fn observers_see_disabled_to_enabled_transition_once() {
        let hal = Arc::new(FakeHal::new());
        let config = AdapterConfig {
            persisted_toggle: false,
            airplane_mode: false,
            ..AdapterConfig::default()
        };
        let adapter = Adapter::boot(hal, ChipId("chip0".into()), &config);
        let count = Arc::new(AtomicUsize::new(0));
        adapter.register_adapter_state_callback(Arc::new(CountingListener(count.clone())));
        adapter.set_enabled(true).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Re-asserting the same state must not notify again.
        adapter.set_enabled(true).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

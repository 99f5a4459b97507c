//! # pose
//!
//! Pose sources (spec §4.B): lazy producers of `Pose` events behind an
//! observer contract. Acquisition starts on the first listener and stops
//! once the last one unregisters; publish is lock-copy-iterate so a
//! listener callback never runs while holding the source's lock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uwb_types::{Pose, PoseCapability, Quat, Vec3};

pub type PoseListener = Arc<dyn Fn(Pose) + Send + Sync>;

/// Fixed correction applied by every sensor-driven source: rotates
/// incoming quaternions from "+Z up" sensor convention to this crate's
/// "+Y up" pose convention.
fn sensor_to_pose_frame(q: Quat) -> Quat {
    Quat::from_pitch(-std::f64::consts::FRAC_PI_2).mul(&q)
}

struct Listeners {
    items: Vec<PoseListener>,
    started: bool,
}

/// Shared plumbing every concrete pose source variant uses: listener
/// registry, start/stop gating, last-known snapshot.
struct PoseHub {
    listeners: Mutex<Listeners>,
    last: Mutex<Option<Pose>>,
}

impl PoseHub {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(Listeners {
                items: Vec::new(),
                started: false,
            }),
            last: Mutex::new(None),
        }
    }

    /// Returns true if this call transitioned 0→1 listeners (caller
    /// should start acquisition).
    fn register(&self, listener: PoseListener) -> bool {
        let mut l = self.listeners.lock().unwrap();
        l.items.push(listener);
        if !l.started {
            l.started = true;
            true
        } else {
            false
        }
    }

    /// Returns true if this call transitioned to 0 listeners (caller
    /// should stop acquisition). Identity comparison is by pointer since
    /// listeners are opaque closures.
    fn unregister(&self, listener: &PoseListener) -> bool {
        let mut l = self.listeners.lock().unwrap();
        l.items.retain(|x| !Arc::ptr_eq(x, listener));
        if l.items.is_empty() && l.started {
            l.started = false;
            true
        } else {
            false
        }
    }

    fn publish(&self, pose: Pose) {
        *self.last.lock().unwrap() = Some(pose);
        let snapshot: Vec<PoseListener> = self.listeners.lock().unwrap().items.clone();
        for listener in snapshot {
            listener(pose);
        }
    }

    fn snapshot(&self) -> Option<Pose> {
        *self.last.lock().unwrap()
    }
}

pub trait PoseSource: Send + Sync {
    fn register(&self, listener: PoseListener);
    fn unregister(&self, listener: &PoseListener);
    fn snapshot(&self) -> Option<Pose>;
    fn capabilities(&self) -> &'static [PoseCapability];
}

/// Absolute orientation from a fused rotation-vector sensor. No
/// translation. Capabilities: YAW, PITCH, ROLL, UPRIGHT.
pub struct RotationVectorSource {
    hub: PoseHub,
}

impl RotationVectorSource {
    pub fn new() -> Self {
        Self { hub: PoseHub::new() }
    }

    /// Called by the (external, out-of-scope) sensor acquisition layer
    /// whenever a new absolute orientation sample arrives.
    pub fn feed(&self, orientation: Quat) {
        let rotation = sensor_to_pose_frame(orientation);
        self.hub.publish(Pose {
            translation: Vec3::ZERO,
            rotation,
        });
    }
}

impl Default for RotationVectorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseSource for RotationVectorSource {
    fn register(&self, listener: PoseListener) {
        self.hub.register(listener);
    }
    fn unregister(&self, listener: &PoseListener) {
        self.hub.unregister(listener);
    }
    fn snapshot(&self) -> Option<Pose> {
        self.hub.snapshot()
    }
    fn capabilities(&self) -> &'static [PoseCapability] {
        &[
            PoseCapability::Yaw,
            PoseCapability::Pitch,
            PoseCapability::Roll,
            PoseCapability::Upright,
        ]
    }
}

/// Absolute orientation + translation. Capabilities: all seven.
pub struct SixDofSource {
    hub: PoseHub,
}

impl SixDofSource {
    pub fn new() -> Self {
        Self { hub: PoseHub::new() }
    }

    pub fn feed(&self, translation: Vec3, orientation: Quat) {
        self.hub.publish(Pose {
            translation,
            rotation: sensor_to_pose_frame(orientation),
        });
    }
}

impl Default for SixDofSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseSource for SixDofSource {
    fn register(&self, listener: PoseListener) {
        self.hub.register(listener);
    }
    fn unregister(&self, listener: &PoseListener) {
        self.hub.unregister(listener);
    }
    fn snapshot(&self) -> Option<Pose> {
        self.hub.snapshot()
    }
    fn capabilities(&self) -> &'static [PoseCapability] {
        &[
            PoseCapability::Yaw,
            PoseCapability::Pitch,
            PoseCapability::Roll,
            PoseCapability::X,
            PoseCapability::Y,
            PoseCapability::Z,
            PoseCapability::Upright,
        ]
    }
}

/// Integrates angular velocity only; no absolute reference, so not
/// UPRIGHT. Caps the integration step at 2x the declared sample interval
/// if samples stall, to avoid a single dropped sample smearing a large
/// rotation into the pose stream.
pub struct GyroIntegrationSource {
    hub: PoseHub,
    nominal_interval: Duration,
    state: Mutex<GyroState>,
}

struct GyroState {
    orientation: Quat,
    last_sample: Option<Instant>,
}

impl GyroIntegrationSource {
    pub fn new(nominal_interval: Duration) -> Self {
        Self {
            hub: PoseHub::new(),
            nominal_interval,
            state: Mutex::new(GyroState {
                orientation: Quat::default(),
                last_sample: None,
            }),
        }
    }

    /// `angular_velocity` in rad/s around (x, y, z); `now` is the arrival
    /// instant of this sample.
    pub fn feed(&self, angular_velocity: Vec3, now: Instant) {
        let mut state = self.state.lock().unwrap();
        let dt = match state.last_sample {
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev);
                elapsed.min(self.nominal_interval * 2)
            }
            None => self.nominal_interval,
        };
        state.last_sample = Some(now);

        let angle = angular_velocity.norm() * dt.as_secs_f64();
        if angle > 0.0 {
            let axis = Vec3::new(
                angular_velocity.x / angular_velocity.norm(),
                angular_velocity.y / angular_velocity.norm(),
                angular_velocity.z / angular_velocity.norm(),
            );
            let half = angle / 2.0;
            let delta = Quat {
                x: axis.x * half.sin(),
                y: axis.y * half.sin(),
                z: axis.z * half.sin(),
                w: half.cos(),
            };
            state.orientation = delta.mul(&state.orientation);
        }
        let orientation = state.orientation;
        drop(state);

        self.hub.publish(Pose {
            translation: Vec3::ZERO,
            rotation: sensor_to_pose_frame(orientation),
        });
    }
}

impl PoseSource for GyroIntegrationSource {
    fn register(&self, listener: PoseListener) {
        self.hub.register(listener);
    }
    fn unregister(&self, listener: &PoseListener) {
        self.hub.unregister(listener);
    }
    fn snapshot(&self) -> Option<Pose> {
        self.hub.snapshot()
    }
    fn capabilities(&self) -> &'static [PoseCapability] {
        &[PoseCapability::Yaw, PoseCapability::Pitch, PoseCapability::Roll]
    }
}

/// External caller pushes `Pose` values directly (spec §4.B
/// "Application").
pub struct ApplicationSource {
    hub: PoseHub,
}

impl ApplicationSource {
    pub fn new() -> Self {
        Self { hub: PoseHub::new() }
    }

    pub fn push(&self, pose: Pose) {
        self.hub.publish(pose);
    }
}

impl Default for ApplicationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseSource for ApplicationSource {
    fn register(&self, listener: PoseListener) {
        self.hub.register(listener);
    }
    fn unregister(&self, listener: &PoseListener) {
        self.hub.unregister(listener);
    }
    fn snapshot(&self) -> Option<Pose> {
        self.hub.snapshot()
    }
    fn capabilities(&self) -> &'static [PoseCapability] {
        &[
            PoseCapability::Yaw,
            PoseCapability::Pitch,
            PoseCapability::Roll,
            PoseCapability::X,
            PoseCapability::Y,
            PoseCapability::Z,
            PoseCapability::Upright,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_listener_starts_last_listener_stops() {
        let hub = PoseHub::new();
        let l1: PoseListener = Arc::new(|_| {});
        let l2: PoseListener = Arc::new(|_| {});
        assert!(hub.register(l1.clone()));
        assert!(!hub.register(l2.clone()));
        assert!(!hub.unregister(&l1));
        assert!(hub.unregister(&l2));
    }

    #[test]
    fn application_source_publishes_snapshot() {
        let src = ApplicationSource::new();
        assert!(src.snapshot().is_none());
        src.push(Pose::IDENTITY);
        assert_eq!(src.snapshot(), Some(Pose::IDENTITY));
    }

    #[test]
    fn listener_receives_published_pose() {
        let src = ApplicationSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let listener: PoseListener = Arc::new(move |_pose| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        src.register(listener);
        src.push(Pose::IDENTITY);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gyro_integration_caps_step_at_double_nominal_interval() {
        let src = GyroIntegrationSource::new(Duration::from_millis(10));
        let start = Instant::now();
        src.feed(Vec3::new(0.0, 0.0, 1.0), start);
        // Simulate a stall: a sample arrives far later than nominal.
        src.feed(Vec3::new(0.0, 0.0, 1.0), start + Duration::from_secs(5));
        assert!(src.snapshot().is_some());
    }

    #[test]
    fn rotation_vector_capabilities_exclude_translation() {
        let src = RotationVectorSource::new();
        assert!(!src.capabilities().contains(&PoseCapability::X));
        assert!(src.capabilities().contains(&PoseCapability::Upright));
    }

    #[test]
    fn gyro_capabilities_exclude_upright() {
        let src = GyroIntegrationSource::new(Duration::from_millis(10));
        assert!(!src.capabilities().contains(&PoseCapability::Upright));
    }
}

//! # aoa
//!
//! Angle-of-Arrival correction engine (spec §4.C). Combines the sample
//! filters (`filters`) with pose updates (`pose`) through three optional
//! primers and a pose-compensated position filter.

use std::time::Instant;

use uwb_types::{Pose, RangingMeasurement, RangingStatus, Vec3};

use crate::error::{Error, Result};
use crate::filters::{LinearFilter, RotationFilter};

/// A raw spherical reading handed to the engine before any primer runs.
#[derive(Debug, Clone, Copy)]
pub struct SphericalMeasurement {
    pub azimuth_rad: Option<f64>,
    pub elevation_rad: Option<f64>,
    pub distance_cm: f64,
    pub fom: f64,
    pub instant: Instant,
}

/// Injects a best-guess elevation (zero) when upstream measurements lack
/// one, so downstream geometry always has azimuth+elevation+distance.
pub struct EstimatedElevationPrimer;

impl EstimatedElevationPrimer {
    pub fn apply(&self, m: &mut SphericalMeasurement) {
        if m.elevation_rad.is_none() {
            m.elevation_rad = Some(0.0);
        }
    }
}

/// Drops measurements whose azimuth magnitude exceeds the configured
/// field of view.
pub struct FovPrimer {
    pub fov_rad: f64,
}

impl FovPrimer {
    pub fn accepts(&self, m: &SphericalMeasurement) -> bool {
        m.azimuth_rad.map_or(true, |az| az.abs() <= self.fov_rad)
    }
}

/// Resolves the 1-D AoA antenna array's front/back ambiguity
/// (`azimuth` vs `pi - azimuth`) using a pose-motion correlation score.
/// A 1-D array cannot distinguish the two hypotheses from a single
/// reading; we keep a short scoring window and mask output below a
/// confidence threshold.
pub struct BackAzimuthResolver {
    noise_coefficient: f64,
    front_score: f64,
    back_score: f64,
    confidence_threshold: f64,
    last_pose: Option<Pose>,
}

impl BackAzimuthResolver {
    pub fn new(noise_coefficient: f64, confidence_threshold: f64) -> Self {
        Self {
            noise_coefficient,
            front_score: 0.0,
            back_score: 0.0,
            confidence_threshold,
            last_pose: None,
        }
    }

    /// Updates the front/back scores from how well each hypothesis tracks
    /// the device's rotational motion since the last pose, then returns
    /// the resolved azimuth, or `None` if confidence is still too low.
    pub fn resolve(&mut self, azimuth_rad: f64, pose: Pose) -> Option<f64> {
        let back_hypothesis = std::f64::consts::PI - azimuth_rad;

        if let Some(prev) = self.last_pose {
            let yaw_delta = yaw_of(pose) - yaw_of(prev);
            // The hypothesis whose angle moves opposite to device yaw (as
            // expected for a world-locked tag) accrues score; the other
            // decays toward zero at the same rate, scaled by the noise
            // coefficient so noisier setups converge more slowly.
            let agreement = yaw_delta.cos();
            self.front_score = (self.front_score + agreement * self.noise_coefficient).max(0.0);
            self.back_score = (self.back_score - agreement * self.noise_coefficient).max(0.0);
        }
        self.last_pose = Some(pose);

        let total = self.front_score + self.back_score;
        if total == 0.0 || (self.front_score.max(self.back_score) / total.max(1e-9)) < self.confidence_threshold {
            return None;
        }
        if self.front_score >= self.back_score {
            Some(azimuth_rad)
        } else {
            Some(back_hypothesis)
        }
    }
}

fn yaw_of(pose: Pose) -> f64 {
    let q = pose.rotation;
    (2.0 * (q.w * q.z + q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z))
}

/// Three scalar filters (azimuth/elevation rotation filters, distance
/// linear filter) whose outputs re-derive a spherical estimate that tracks
/// world-locked tag position across device motion.
pub struct PositionFilter {
    azimuth: RotationFilter,
    elevation: RotationFilter,
    distance: LinearFilter,
    last_pose: Option<Pose>,
}

impl PositionFilter {
    pub fn new(window_size: usize, cut: f64) -> Result<Self> {
        Ok(Self {
            azimuth: RotationFilter::new(window_size, cut)?,
            elevation: RotationFilter::new(window_size, cut)?,
            distance: LinearFilter::new(window_size, cut)?,
            last_pose: None,
        })
    }

    pub fn add(&mut self, azimuth_rad: f64, elevation_rad: f64, distance_cm: f64, instant: Instant, fom: f64) {
        self.azimuth.add(azimuth_rad, instant, fom);
        self.elevation.add(elevation_rad, instant, fom);
        self.distance.add(distance_cm, instant, fom);
    }

    /// Converts the filter's current spherical estimate to Cartesian,
    /// rotates by the inverse pose delta into the new camera frame,
    /// converts back to spherical, and compensates each scalar filter
    /// with the delta — preserving the tag's world-locked position
    /// across device motion (spec §4.C "Position filter").
    pub fn on_pose_update(&mut self, pose: Pose) -> Result<()> {
        let prev = match self.last_pose.replace(pose) {
            Some(p) => p,
            None => return Ok(()),
        };
        if self.azimuth.len() == 0 {
            return Ok(());
        }
        let az = self.azimuth.result()?.value;
        let el = self.elevation.result()?.value;
        let dist = self.distance.result()?.value;

        let cartesian = spherical_to_cartesian(az, el, dist);
        let pose_delta = prev.rotation.conjugate().mul(&pose.rotation);
        let rotated = pose_delta.conjugate().rotate_vec3(cartesian);
        let (new_az, new_el, new_dist) = cartesian_to_spherical(rotated);

        self.azimuth.compensate(new_az - az);
        self.elevation.compensate(new_el - el);
        self.distance.compensate(new_dist - dist);
        Ok(())
    }

    pub fn result(&self) -> Result<(f64, f64, f64)> {
        Ok((
            self.azimuth.result()?.value,
            self.elevation.result()?.value,
            self.distance.result()?.value,
        ))
    }
}

fn spherical_to_cartesian(azimuth_rad: f64, elevation_rad: f64, distance: f64) -> Vec3 {
    let x = distance * elevation_rad.cos() * azimuth_rad.sin();
    let y = distance * elevation_rad.sin();
    let z = distance * elevation_rad.cos() * azimuth_rad.cos();
    Vec3::new(x, y, z)
}

fn cartesian_to_spherical(v: Vec3) -> (f64, f64, f64) {
    let distance = v.norm();
    if distance == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let azimuth = v.x.atan2(v.z);
    let elevation = (v.y / distance).asin();
    (azimuth, elevation, distance)
}

/// Full pipeline: primers, then the position filter, producing a
/// denoised `RangingMeasurement` suitable to surface to the client.
pub struct AoaEngine {
    estimated_elevation: EstimatedElevationPrimer,
    fov: Option<FovPrimer>,
    back_azimuth: Option<BackAzimuthResolver>,
    position: PositionFilter,
}

impl AoaEngine {
    pub fn new(window_size: usize, cut: f64, fov_rad: Option<f64>) -> Result<Self> {
        Ok(Self {
            estimated_elevation: EstimatedElevationPrimer,
            fov: fov_rad.map(|fov_rad| FovPrimer { fov_rad }),
            back_azimuth: None,
            position: PositionFilter::new(window_size, cut)?,
        })
    }

    pub fn with_back_azimuth_resolution(mut self, noise_coefficient: f64, confidence_threshold: f64) -> Self {
        self.back_azimuth = Some(BackAzimuthResolver::new(noise_coefficient, confidence_threshold));
        self
    }

    pub fn on_pose(&mut self, pose: Pose) -> Result<()> {
        self.position.on_pose_update(pose)
    }

    /// Feeds one raw reading through the pipeline. Returns `None` if a
    /// primer dropped the reading (outside FOV) or back-azimuth
    /// resolution is still below confidence.
    pub fn process(&mut self, mut raw: SphericalMeasurement, pose: Option<Pose>) -> Result<Option<()>> {
        self.estimated_elevation.apply(&mut raw);

        if let Some(fov) = &self.fov {
            if !fov.accepts(&raw) {
                return Ok(None);
            }
        }

        let mut azimuth = raw
            .azimuth_rad
            .ok_or_else(|| Error::Protocol("measurement missing azimuth after primers".into()))?;

        if let (Some(resolver), Some(pose)) = (&mut self.back_azimuth, pose) {
            match resolver.resolve(azimuth, pose) {
                Some(resolved) => azimuth = resolved,
                None => return Ok(None),
            }
        }

        let elevation = raw.elevation_rad.unwrap_or(0.0);
        self.position.add(azimuth, elevation, raw.distance_cm, raw.instant, raw.fom);
        Ok(Some(()))
    }

    pub fn to_measurement(&self, peer: uwb_types::PeerAddress) -> Result<RangingMeasurement> {
        let (az, el, dist) = self.position.result()?;
        Ok(RangingMeasurement {
            peer,
            status: RangingStatus::Ok,
            distance_cm: Some(dist.max(0.0) as u32),
            aoa_azimuth_rad: Some(az),
            aoa_azimuth_fom: Some(100),
            aoa_elevation_rad: Some(el),
            aoa_elevation_fom: Some(100),
            line_of_sight: None,
            rssi_dbm: None,
            slot_index: None,
            frame_seq_num: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn estimated_elevation_primer_fills_missing_value() {
        let primer = EstimatedElevationPrimer;
        let mut m = SphericalMeasurement {
            azimuth_rad: Some(0.1),
            elevation_rad: None,
            distance_cm: 100.0,
            fom: 1.0,
            instant: t(0),
        };
        primer.apply(&mut m);
        assert_eq!(m.elevation_rad, Some(0.0));
    }

    #[test]
    fn fov_primer_rejects_outside_range() {
        let fov = FovPrimer { fov_rad: 0.5 };
        let m = SphericalMeasurement {
            azimuth_rad: Some(0.9),
            elevation_rad: Some(0.0),
            distance_cm: 100.0,
            fom: 1.0,
            instant: t(0),
        };
        assert!(!fov.accepts(&m));
    }

    #[test]
    fn position_filter_reports_added_value_with_no_pose_update() {
        let mut pf = PositionFilter::new(3, 1.0).unwrap();
        pf.add(0.1, 0.0, 100.0, t(0), 1.0);
        pf.add(0.1, 0.0, 100.0, t(1), 1.0);
        let (az, el, dist) = pf.result().unwrap();
        assert!((az - 0.1).abs() < 1e-6);
        assert!((el - 0.0).abs() < 1e-6);
        assert!((dist - 100.0).abs() < 1e-6);
    }

    #[test]
    fn engine_process_populates_measurement() {
        let mut engine = AoaEngine::new(3, 1.0, None).unwrap();
        let raw = SphericalMeasurement {
            azimuth_rad: Some(0.05),
            elevation_rad: None,
            distance_cm: 150.0,
            fom: 1.0,
            instant: t(0),
        };
        let processed = engine.process(raw, None).unwrap();
        assert!(processed.is_some());
        let measurement = engine.to_measurement(uwb_types::PeerAddress(vec![1, 2])).unwrap();
        assert!(measurement.is_usable());
        assert_eq!(measurement.distance_cm, Some(150));
    }

    #[test]
    fn engine_drops_reading_outside_fov() {
        let mut engine = AoaEngine::new(3, 1.0, Some(0.2)).unwrap();
        let raw = SphericalMeasurement {
            azimuth_rad: Some(1.0),
            elevation_rad: Some(0.0),
            distance_cm: 150.0,
            fom: 1.0,
            instant: t(0),
        };
        let processed = engine.process(raw, None).unwrap();
        assert!(processed.is_none());
    }
}

//! # filters
//!
//! Median-average sample filters (spec §4.A). A filter keeps a sliding
//! window of up to 255 `Sample`s and reports a FOM-weighted average of
//! the middle portion of the sorted window, trimming outliers at each
//! end. The rotation variant additionally handles angles wrapping at
//! ±π before sorting.
//!
//! `std::time::Instant` is this crate's single monotonic-time
//! abstraction; every `Sample` carries one instead of a wall-clock
//! timestamp.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub value: f64,
    pub instant: Instant,
    /// Figure of merit in `[0, 1]`.
    pub fom: f64,
}

impl Sample {
    pub fn new(value: f64, instant: Instant, fom: f64) -> Self {
        Self { value, instant, fom }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterResult {
    pub value: f64,
    pub instant: Instant,
}

/// Linear (non-angular) median-average filter over scalar values such as
/// distance.
#[derive(Debug, Clone)]
pub struct LinearFilter {
    window_size: usize,
    cut: f64,
    samples: Vec<Sample>,
}

impl LinearFilter {
    pub fn new(window_size: usize, cut: f64) -> Result<Self> {
        validate_window_size(window_size)?;
        validate_cut(cut)?;
        Ok(Self {
            window_size,
            cut,
            samples: Vec::with_capacity(window_size),
        })
    }

    pub fn add(&mut self, value: f64, instant: Instant, fom: f64) {
        if self.samples.len() == self.window_size {
            self.samples.remove(0);
        }
        self.samples.push(Sample::new(value, instant, fom));
    }

    /// Shifts every retained sample's value and extends the implicit
    /// reference frame by `shift`; the next `result()` reflects the new
    /// frame without needing a fresh `add`.
    pub fn compensate(&mut self, shift: f64) {
        for s in &mut self.samples {
            s.value += shift;
        }
    }

    pub fn result(&self) -> Result<FilterResult> {
        weighted_trimmed_average(&self.samples, self.cut, |v| v)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Angular variant: values live in `(-π, π]` and wrap. Used for azimuth
/// and elevation filters in the AoA pipeline.
#[derive(Debug, Clone)]
pub struct RotationFilter {
    window_size: usize,
    cut: f64,
    samples: Vec<Sample>,
}

impl RotationFilter {
    pub fn new(window_size: usize, cut: f64) -> Result<Self> {
        validate_window_size(window_size)?;
        validate_cut(cut)?;
        Ok(Self {
            window_size,
            cut,
            samples: Vec::with_capacity(window_size),
        })
    }

    pub fn add(&mut self, value: f64, instant: Instant, fom: f64) {
        if self.samples.len() == self.window_size {
            self.samples.remove(0);
        }
        self.samples.push(Sample::new(normalize_angle(value), instant, fom));
    }

    pub fn compensate(&mut self, shift: f64) {
        for s in &mut self.samples {
            s.value = normalize_angle(s.value + shift);
        }
    }

    pub fn result(&self) -> Result<FilterResult> {
        if self.samples.is_empty() {
            return Err(Error::Protocol("rotation filter result requested on empty window".into()));
        }
        if self.samples.len() == 1 {
            let s = self.samples[0];
            return Ok(FilterResult {
                value: s.value,
                instant: s.instant,
            });
        }
        let unwrapped = unwrap_for_sort(&self.samples);
        weighted_trimmed_average(&unwrapped, self.cut, normalize_angle)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

fn validate_window_size(n: usize) -> Result<()> {
    if n == 0 || n > 255 {
        return Err(Error::Parameter(format!(
            "window size must be in 1..=255, got {n}"
        )));
    }
    Ok(())
}

fn validate_cut(cut: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&cut) {
        return Err(Error::Parameter(format!("cut must be in [0, 1], got {cut}")));
    }
    Ok(())
}

/// Normalizes an angle into `(-π, π]`.
pub fn normalize_angle(v: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    let mut v = (v + std::f64::consts::PI) % two_pi;
    if v <= 0.0 {
        v += two_pi;
    }
    v - std::f64::consts::PI
}

/// Rotates the window so the largest circular gap sits at the sort
/// boundary, then unwraps (adds 2π to the samples before the gap) so a
/// plain numeric sort produces the angularly-correct order (spec §4.A
/// "Rotation variant").
fn unwrap_for_sort(samples: &[Sample]) -> Vec<Sample> {
    let n = samples.len();
    let two_pi = std::f64::consts::TAU;

    let mut sorted_idx: Vec<usize> = (0..n).collect();
    sorted_idx.sort_by(|&a, &b| samples[a].value.partial_cmp(&samples[b].value).unwrap());

    let mut split_at = 0;
    let mut max_gap = f64::MIN;
    for i in 0..n {
        let prev = sorted_idx[(i + n - 1) % n];
        let cur = sorted_idx[i];
        let mut gap = samples[cur].value - samples[prev].value;
        if gap < 0.0 {
            gap += two_pi;
        }
        if gap > max_gap {
            max_gap = gap;
            split_at = i;
        }
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let idx = sorted_idx[i];
        let mut s = samples[idx];
        if i < split_at {
            s.value += two_pi;
        }
        out.push(s);
    }
    out
}

/// Drops `K = round(C*(1-cut)/2)` outliers at each end of the
/// value-sorted window (clamped so at least one sample survives), then
/// returns the FOM-weighted average value and instant of what remains.
/// Instants are rebased to the earliest surviving instant before
/// averaging to limit overflow, then re-based back.
fn weighted_trimmed_average(
    samples: &[Sample],
    cut: f64,
    remap: impl Fn(f64) -> f64,
) -> Result<FilterResult> {
    if samples.is_empty() {
        return Err(Error::Protocol("filter result requested on empty window".into()));
    }
    let c = samples.len();
    let mut sorted: Vec<Sample> = samples.to_vec();
    sorted.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());

    let mut k = ((c as f64) * (1.0 - cut) / 2.0).round() as usize;
    let max_k = if c % 2 == 0 { (c - 2) / 2 } else { (c - 1) / 2 };
    if k > max_k {
        k = max_k;
    }
    let middle = &sorted[k..c - k];

    let total_weight: f64 = middle.iter().map(|s| s.fom).sum();
    if total_weight == 0.0 {
        return Err(Error::Protocol("all samples in trimmed window have zero FOM".into()));
    }

    let value = middle.iter().map(|s| s.value * s.fom).sum::<f64>() / total_weight;

    let base = middle
        .iter()
        .map(|s| s.instant)
        .min()
        .expect("middle is non-empty");
    let instant_offset = middle
        .iter()
        .map(|s| s.instant.saturating_duration_since(base).as_secs_f64() * s.fom)
        .sum::<f64>()
        / total_weight;
    let instant = base + Duration::from_secs_f64(instant_offset.max(0.0));

    Ok(FilterResult {
        value: remap(value),
        instant,
    })
}

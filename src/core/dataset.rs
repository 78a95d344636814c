//! Synthetic IMU gesture windows.
//!
//! Each class is a distinct accelerometer/gyroscope waveform; a sample's
//! feature vector is the per-channel mean over the window.

use std::f32::consts::PI;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnnError};

/// Number of IMU channels: accel x/y/z then gyro x/y/z.
pub const IMU_CHANNELS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    pub features: Vec<f32>,
    pub label: usize,
}

impl AsRef<[f32]> for Sample {
    fn as_ref(&self) -> &[f32] {
        &self.features
    }
}

/// Split `samples` into `(features, labels)` views for batch evaluation.
pub fn unzip(samples: &[Sample]) -> (Vec<&[f32]>, Vec<usize>) {
    samples
        .iter()
        .map(|s| (s.features.as_slice(), s.label))
        .unzip()
}

/// Parameters of the synthetic gesture generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticImu {
    pub num_classes: usize,
    /// Points per window over `t in [0, 2*pi]`.
    pub seq_len: usize,
    pub accel_noise: f32,
    pub gyro_noise: f32,
}

impl Default for SyntheticImu {
    fn default() -> Self {
        Self {
            num_classes: 6,
            seq_len: 100,
            accel_noise: 0.1,
            gyro_noise: 0.05,
        }
    }
}

impl SyntheticImu {
    pub fn with_classes(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    /// Draw `num_samples` windows with uniformly random classes.
    pub fn generate<R: Rng + ?Sized>(&self, num_samples: usize, rng: &mut R) -> Result<Vec<Sample>> {
        if self.num_classes == 0 || self.seq_len < 2 {
            return Err(SnnError::config("need >= 1 class and >= 2 points per window"));
        }
        let accel = Normal::new(0.0, self.accel_noise)
            .map_err(|e| SnnError::config(format!("accel noise: {e}")))?;
        let gyro = Normal::new(0.0, self.gyro_noise)
            .map_err(|e| SnnError::config(format!("gyro noise: {e}")))?;

        let mut samples = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let label = rng.gen_range(0..self.num_classes);
            let features = self.window_means(label, &accel, &gyro, rng);
            samples.push(Sample { features, label });
        }
        Ok(samples)
    }

    fn window_means<R: Rng + ?Sized>(
        &self,
        class: usize,
        accel: &Normal<f32>,
        gyro: &Normal<f32>,
        rng: &mut R,
    ) -> Vec<f32> {
        let freq = (class as f32 + 1.0) * 0.5;
        let phase = class as f32 * PI / 3.0;
        let mut sums = [0.0f32; IMU_CHANNELS];

        for i in 0..self.seq_len {
            let t = 2.0 * PI * i as f32 / (self.seq_len - 1) as f32;
            let channels = [
                (freq * t + phase).sin() + accel.sample(rng),
                (freq * t + phase).cos() + accel.sample(rng),
                0.5 * (2.0 * freq * t).sin() + accel.sample(rng),
                0.3 * (freq * t).cos() + gyro.sample(rng),
                0.3 * (freq * t).sin() + gyro.sample(rng),
                0.2 * (freq * t + PI / 4.0).sin() + gyro.sample(rng),
            ];
            for (s, v) in sums.iter_mut().zip(channels) {
                *s += v;
            }
        }
        sums.iter().map(|s| s / self.seq_len as f32).collect()
    }
}

/// Stratified split into `(train, validation)`.
///
/// Every class contributes `round(n_c * val_fraction)` samples to the
/// validation set, so class proportions are preserved on both sides.
pub fn stratified_split<R: Rng + ?Sized>(
    samples: Vec<Sample>,
    val_fraction: f32,
    rng: &mut R,
) -> Result<(Vec<Sample>, Vec<Sample>)> {
    if !(0.0..1.0).contains(&val_fraction) {
        return Err(SnnError::config("val_fraction must be in [0, 1)"));
    }
    let num_classes = samples.iter().map(|s| s.label + 1).max().unwrap_or(0);
    let mut by_class: Vec<Vec<Sample>> = vec![Vec::new(); num_classes];
    for s in samples {
        by_class[s.label].push(s);
    }

    let mut train = Vec::new();
    let mut val = Vec::new();
    for mut group in by_class {
        group.shuffle(rng);
        let n_val = (group.len() as f32 * val_fraction).round() as usize;
        let rest = group.split_off(n_val);
        val.extend(group);
        train.extend(rest);
    }
    train.shuffle(rng);
    val.shuffle(rng);
    Ok((train, val))
}

//! Spike encoding of continuous IMU features.

use rand::Rng;

use crate::config::{Encoding, NetworkConfig};
use crate::error::{ensure_len, Result, SnnError};

/// Binary spikes for `num_steps` time steps, row-major (`[step][channel]`).
///
/// Spikes are stored as `f32` `0.0` / `1.0` so they can feed the affine
/// layers directly.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeTrain {
    num_steps: usize,
    channels: usize,
    bits: Vec<f32>,
}

impl SpikeTrain {
    pub fn zeros(num_steps: usize, channels: usize) -> Self {
        Self {
            num_steps,
            channels,
            bits: vec![0.0; num_steps * channels],
        }
    }

    /// Build a train from explicit rows. Every row must have the same length
    /// and contain only `0.0` or `1.0`.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let channels = rows.first().map_or(0, Vec::len);
        let mut bits = Vec::with_capacity(rows.len() * channels);
        for row in rows {
            ensure_len("spike train row", channels, row.len())?;
            if row.iter().any(|&b| b != 0.0 && b != 1.0) {
                return Err(SnnError::format("spike values must be 0 or 1"));
            }
            bits.extend_from_slice(row);
        }
        Ok(Self {
            num_steps: rows.len(),
            channels,
            bits,
        })
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Spikes of time step `t`.
    pub fn step(&self, t: usize) -> &[f32] {
        &self.bits[t * self.channels..(t + 1) * self.channels]
    }

    pub fn steps(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact(0) panics; an empty train yields nothing either way.
        self.bits.chunks_exact(self.channels.max(1))
    }

    fn step_mut(&mut self, t: usize) -> &mut [f32] {
        &mut self.bits[t * self.channels..(t + 1) * self.channels]
    }

    /// Total number of spikes in the train.
    pub fn spike_count(&self) -> usize {
        self.bits.iter().filter(|&&b| b != 0.0).count()
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Turns a feature vector into a [`SpikeTrain`].
///
/// The random source is always supplied by the caller; fixing its seed makes
/// the produced trains reproducible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEncoder {
    num_steps: usize,
    gain: f32,
    encoding: Encoding,
}

impl SpikeEncoder {
    pub const DEFAULT_GAIN: f32 = 10.0;

    pub fn new(num_steps: usize, gain: f32, encoding: Encoding) -> Result<Self> {
        if num_steps == 0 {
            return Err(SnnError::config("num_steps must be > 0"));
        }
        if !gain.is_finite() || gain <= 0.0 {
            return Err(SnnError::config("gain must be finite and > 0"));
        }
        Ok(Self {
            num_steps,
            gain,
            encoding,
        })
    }

    pub fn from_config(cfg: &NetworkConfig) -> Result<Self> {
        Self::new(cfg.num_steps, cfg.gain, cfg.encoding)
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Per-channel firing probability used by rate coding.
    pub fn firing_probabilities(&self, features: &[f32]) -> Vec<f32> {
        features.iter().map(|&x| sigmoid(self.gain * x)).collect()
    }

    pub fn encode<R: Rng + ?Sized>(&self, features: &[f32], rng: &mut R) -> SpikeTrain {
        match self.encoding {
            Encoding::Rate => self.encode_rate(features, rng),
            Encoding::Latency => self.encode_latency(features),
        }
    }

    fn encode_rate<R: Rng + ?Sized>(&self, features: &[f32], rng: &mut R) -> SpikeTrain {
        let probs = self.firing_probabilities(features);
        let mut train = SpikeTrain::zeros(self.num_steps, features.len());
        for t in 0..self.num_steps {
            for (bit, &p) in train.step_mut(t).iter_mut().zip(&probs) {
                // Bernoulli(p): uniform [0, 1) below p.
                if rng.gen::<f32>() < p {
                    *bit = 1.0;
                }
            }
        }
        train
    }

    fn encode_latency(&self, features: &[f32]) -> SpikeTrain {
        let mut train = SpikeTrain::zeros(self.num_steps, features.len());
        for (i, &x) in features.iter().enumerate() {
            let t = self.latency_step(x);
            train.step_mut(t)[i] = 1.0;
        }
        train
    }

    /// Step at which a latency-coded channel fires: `x >= 1` fires at step 0,
    /// `x <= -1` at the last step.
    pub fn latency_step(&self, x: f32) -> usize {
        let normalized = ((x + 1.0) / 2.0).clamp(0.0, 1.0);
        let t = ((1.0 - normalized) * self.num_steps as f32) as usize;
        t.min(self.num_steps - 1)
    }
}

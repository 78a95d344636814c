#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "serde")]
use std::path::Path;

use crate::error::{Result, SnnError};

/// How continuous features are turned into spikes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Encoding {
    /// Bernoulli spikes with probability `sigmoid(gain * x)` at every step.
    #[default]
    Rate,
    /// One spike per channel; larger inputs fire earlier. Deterministic.
    Latency,
}

/// Shape and neuron dynamics of a two-layer spiking network.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    /// Feature channels (3-axis accel + 3-axis gyro by default).
    pub input_size: usize,
    pub hidden_size: usize,
    /// Number of gesture classes.
    pub output_size: usize,

    /// Simulation steps per sample (`T`).
    pub num_steps: usize,

    /// Membrane time constant; the per-step decay is `exp(-1 / tau_mem)`.
    pub tau_mem: f32,
    /// Firing threshold. Values `<= 0` make neurons fire constantly.
    pub threshold: f32,

    /// Encoder sharpness for rate coding.
    pub gain: f32,
    pub encoding: Encoding,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 6,
            hidden_size: 128,
            output_size: 6,
            num_steps: 10,
            tau_mem: 10.0,
            threshold: 1.0,
            gain: 10.0,
            encoding: Encoding::Rate,
        }
    }
}

impl NetworkConfig {
    /// Create a config with the given layer sizes and default dynamics.
    pub fn with_size(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
            ..Default::default()
        }
    }

    pub fn with_steps(mut self, num_steps: usize) -> Self {
        self.num_steps = num_steps;
        self
    }

    pub fn with_tau_mem(mut self, tau_mem: f32) -> Self {
        self.tau_mem = tau_mem;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Validate the configuration.
    ///
    /// A zero or negative threshold is accepted: it is degenerate (every
    /// neuron fires every step) but well defined.
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.hidden_size == 0 || self.output_size == 0 {
            return Err(SnnError::config("layer sizes must be > 0"));
        }
        if self.num_steps == 0 {
            return Err(SnnError::config("num_steps must be > 0"));
        }
        LifParams::new(self.tau_mem, self.threshold)?;
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(SnnError::config("gain must be finite and > 0"));
        }
        Ok(())
    }

    pub fn lif_params(&self) -> Result<LifParams> {
        LifParams::new(self.tau_mem, self.threshold)
    }

    #[cfg(feature = "serde")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Validated LIF dynamics shared by every neuron of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifParams {
    tau_mem: f32,
    threshold: f32,
    beta: f32,
}

impl LifParams {
    pub const DEFAULT_TAU_MEM: f32 = 10.0;
    pub const DEFAULT_THRESHOLD: f32 = 1.0;

    pub fn new(tau_mem: f32, threshold: f32) -> Result<Self> {
        if !tau_mem.is_finite() || tau_mem <= 0.0 {
            return Err(SnnError::config(format!(
                "tau_mem must be finite and > 0 (got {tau_mem})"
            )));
        }
        if !threshold.is_finite() {
            return Err(SnnError::config("threshold must be finite"));
        }
        Ok(Self {
            tau_mem,
            threshold,
            beta: (-1.0 / tau_mem).exp(),
        })
    }

    pub fn tau_mem(&self) -> f32 {
        self.tau_mem
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Membrane decay per step, in `(0, 1)`.
    pub fn beta(&self) -> f32 {
        self.beta
    }
}

impl Default for LifParams {
    fn default() -> Self {
        let tau_mem = Self::DEFAULT_TAU_MEM;
        Self {
            tau_mem,
            threshold: Self::DEFAULT_THRESHOLD,
            beta: (-1.0 / tau_mem).exp(),
        }
    }
}

/// Optimisation settings for [`crate::train::Trainer`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,

    // Adam.
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,

    /// Seeds weight init, shuffling and spike encoding.
    pub seed: u64,
    /// Emit an `info` line every `log_every` epochs (0 disables).
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            seed: 42,
            log_every: 10,
        }
    }
}

impl TrainConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SnnError::config("batch_size must be > 0"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(SnnError::config("learning_rate must be finite and > 0"));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(SnnError::config("adam betas must be in [0, 1)"));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(SnnError::config("epsilon must be finite and > 0"));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

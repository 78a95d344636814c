//! Two-layer spiking network unrolled over a fixed number of time steps.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;
use crate::encoder::{SpikeEncoder, SpikeTrain};
use crate::error::{ensure_len, Result, SnnError};
use crate::lif::LifLayer;

/// Execution tier for batched forward passes.
///
/// The time unroll of one sample is always sequential; tiers only decide how
/// independent samples are spread over threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    /// Single-threaded (default, works everywhere).
    #[default]
    Scalar,
    /// One rayon task per sample (requires `parallel` feature).
    Parallel,
}

/// The fixed set of trainable tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Lif1Weight,
    Lif1Bias,
    Lif2Weight,
    Lif2Bias,
}

impl ParamId {
    /// Export order.
    pub const ALL: [ParamId; 4] = [
        ParamId::Lif1Weight,
        ParamId::Lif1Bias,
        ParamId::Lif2Weight,
        ParamId::Lif2Bias,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamId::Lif1Weight => "lif1.fc.weight",
            ParamId::Lif1Bias => "lif1.fc.bias",
            ParamId::Lif2Weight => "lif2.fc.weight",
            ParamId::Lif2Bias => "lif2.fc.bias",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Borrowed view of one named parameter tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRef<'a> {
    pub name: &'a str,
    pub shape: Vec<usize>,
    /// Row-major.
    pub data: &'a [f32],
}

/// Per-sample firing summary from [`SpikingNetwork::forward_traced`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FiringStats {
    pub input_spikes: usize,
    pub hidden_spikes: usize,
    pub output_spikes: usize,
    /// Fraction of (neuron, step) pairs that fired.
    pub hidden_rate: f32,
    pub output_rate: f32,
}

/// Everything the backward pass needs from one unrolled sample.
#[derive(Debug, Clone)]
pub(crate) struct Unroll {
    pub inputs: SpikeTrain,
    /// Pre-reset potentials, `[T][hidden]`.
    pub u1: Vec<f32>,
    pub s1: Vec<f32>,
    /// Pre-reset potentials, `[T][output]`.
    pub u2: Vec<f32>,
    pub s2: Vec<f32>,
    pub counts: Vec<f32>,
}

/// Encoder followed by two LIF layers.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikingNetwork {
    config: NetworkConfig,
    encoder: SpikeEncoder,
    pub(crate) lif1: LifLayer,
    pub(crate) lif2: LifLayer,
    tier: ExecutionTier,
}

impl SpikingNetwork {
    /// Network with all-zero parameters.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        let params = config.lif_params()?;
        Ok(Self {
            config,
            encoder: SpikeEncoder::from_config(&config)?,
            lif1: LifLayer::new(config.input_size, config.hidden_size, params)?,
            lif2: LifLayer::new(config.hidden_size, config.output_size, params)?,
            tier: ExecutionTier::default(),
        })
    }

    /// Network with fan-in scaled uniform initialisation.
    pub fn init<R: Rng + ?Sized>(config: NetworkConfig, rng: &mut R) -> Result<Self> {
        let mut net = Self::new(config)?;
        net.lif1.init_uniform(rng);
        net.lif2.init_uniform(rng);
        Ok(net)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn encoder(&self) -> &SpikeEncoder {
        &self.encoder
    }

    pub fn layers(&self) -> (&LifLayer, &LifLayer) {
        (&self.lif1, &self.lif2)
    }

    pub fn num_steps(&self) -> usize {
        self.config.num_steps
    }

    pub fn execution_tier(&self) -> ExecutionTier {
        self.tier
    }

    pub fn set_execution_tier(&mut self, tier: ExecutionTier) {
        self.tier = tier;
    }

    pub fn param_shape(&self, id: ParamId) -> Vec<usize> {
        let c = &self.config;
        match id {
            ParamId::Lif1Weight => vec![c.hidden_size, c.input_size],
            ParamId::Lif1Bias => vec![c.hidden_size],
            ParamId::Lif2Weight => vec![c.output_size, c.hidden_size],
            ParamId::Lif2Bias => vec![c.output_size],
        }
    }

    pub fn param(&self, id: ParamId) -> &[f32] {
        match id {
            ParamId::Lif1Weight => &self.lif1.weights,
            ParamId::Lif1Bias => &self.lif1.bias,
            ParamId::Lif2Weight => &self.lif2.weights,
            ParamId::Lif2Bias => &self.lif2.bias,
        }
    }

    pub(crate) fn param_mut(&mut self, id: ParamId) -> &mut [f32] {
        match id {
            ParamId::Lif1Weight => &mut self.lif1.weights,
            ParamId::Lif1Bias => &mut self.lif1.bias,
            ParamId::Lif2Weight => &mut self.lif2.weights,
            ParamId::Lif2Bias => &mut self.lif2.bias,
        }
    }

    /// Replace one parameter tensor. Values must be finite.
    pub fn set_param(&mut self, id: ParamId, data: &[f32]) -> Result<()> {
        let dst = self.param_mut(id);
        ensure_len(id.name(), dst.len(), data.len())?;
        if data.iter().any(|v| !v.is_finite()) {
            return Err(SnnError::non_finite("parameter tensor"));
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    /// All trainable tensors, in export order.
    pub fn parameters(&self) -> Vec<TensorRef<'_>> {
        ParamId::ALL
            .into_iter()
            .map(|id| TensorRef {
                name: id.name(),
                shape: self.param_shape(id),
                data: self.param(id),
            })
            .collect()
    }

    pub fn parameter_count(&self) -> usize {
        ParamId::ALL.into_iter().map(|id| self.param(id).len()).sum()
    }

    /// Encode `features` and return the output spike count per class.
    pub fn forward<R: Rng + ?Sized>(&self, features: &[f32], rng: &mut R) -> Result<Vec<f32>> {
        ensure_len("features", self.config.input_size, features.len())?;
        let train = self.encoder.encode(features, rng);
        self.run(&train)
    }

    /// Unroll a pre-encoded spike train. Deterministic.
    ///
    /// Fails if a membrane potential becomes NaN or infinite.
    pub fn run(&self, train: &SpikeTrain) -> Result<Vec<f32>> {
        self.check_train(train)?;
        let mut counts = vec![0.0; self.config.output_size];
        self.unroll(train, |_, _, _, s2| {
            for (c, s) in counts.iter_mut().zip(s2) {
                *c += s;
            }
        })?;
        Ok(counts)
    }

    /// Like [`forward`](Self::forward), also reporting firing activity.
    pub fn forward_traced<R: Rng + ?Sized>(
        &self,
        features: &[f32],
        rng: &mut R,
    ) -> Result<(Vec<f32>, FiringStats)> {
        ensure_len("features", self.config.input_size, features.len())?;
        let train = self.encoder.encode(features, rng);
        self.check_train(&train)?;

        let mut counts = vec![0.0; self.config.output_size];
        let mut hidden_spikes = 0usize;
        self.unroll(&train, |_, s1, _, s2| {
            hidden_spikes += s1.iter().filter(|&&s| s != 0.0).count();
            for (c, s) in counts.iter_mut().zip(s2) {
                *c += s;
            }
        })?;

        let steps = self.config.num_steps as f32;
        let output_spikes = counts.iter().sum::<f32>() as usize;
        let stats = FiringStats {
            input_spikes: train.spike_count(),
            hidden_spikes,
            output_spikes,
            hidden_rate: hidden_spikes as f32 / (steps * self.config.hidden_size as f32),
            output_rate: output_spikes as f32 / (steps * self.config.output_size as f32),
        };
        Ok((counts, stats))
    }

    /// Arg-max class of a fresh forward pass.
    pub fn predict<R: Rng + ?Sized>(&self, features: &[f32], rng: &mut R) -> Result<usize> {
        Ok(argmax(&self.forward(features, rng)?))
    }

    /// Spike counts for independent samples.
    ///
    /// Sample `i` is encoded with [`sample_rng`]`(seed, i)`, so the result does
    /// not depend on the execution tier or on thread scheduling.
    pub fn forward_batch<S>(&self, samples: &[S], seed: u64) -> Result<Vec<Vec<f32>>>
    where
        S: AsRef<[f32]> + Sync,
    {
        match self.tier {
            ExecutionTier::Scalar => self.forward_batch_scalar(samples, seed),
            ExecutionTier::Parallel => self.forward_batch_parallel(samples, seed),
        }
    }

    fn forward_batch_scalar<S: AsRef<[f32]>>(
        &self,
        samples: &[S],
        seed: u64,
    ) -> Result<Vec<Vec<f32>>> {
        samples
            .iter()
            .enumerate()
            .map(|(i, x)| self.forward(x.as_ref(), &mut sample_rng(seed, i)))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn forward_batch_parallel<S>(&self, samples: &[S], seed: u64) -> Result<Vec<Vec<f32>>>
    where
        S: AsRef<[f32]> + Sync,
    {
        samples
            .par_iter()
            .enumerate()
            .map(|(i, x)| self.forward(x.as_ref(), &mut sample_rng(seed, i)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn forward_batch_parallel<S>(&self, samples: &[S], seed: u64) -> Result<Vec<Vec<f32>>>
    where
        S: AsRef<[f32]> + Sync,
    {
        self.forward_batch_scalar(samples, seed)
    }

    /// Fraction of samples whose arg-max matches the label.
    pub fn accuracy<S>(&self, samples: &[S], labels: &[usize], seed: u64) -> Result<f32>
    where
        S: AsRef<[f32]> + Sync,
    {
        ensure_len("labels", samples.len(), labels.len())?;
        if samples.is_empty() {
            return Ok(0.0);
        }
        let outputs = self.forward_batch(samples, seed)?;
        let correct = outputs
            .iter()
            .zip(labels)
            .filter(|(counts, &label)| argmax(counts) == label)
            .count();
        Ok(correct as f32 / samples.len() as f32)
    }

    /// Unroll keeping the per-step potentials and spikes for BPTT.
    ///
    /// Fails if a membrane potential becomes NaN or infinite.
    pub(crate) fn run_recorded(&self, train: SpikeTrain) -> Result<Unroll> {
        self.check_train(&train)?;
        let c = &self.config;
        let mut rec = Unroll {
            u1: Vec::with_capacity(c.num_steps * c.hidden_size),
            s1: Vec::with_capacity(c.num_steps * c.hidden_size),
            u2: Vec::with_capacity(c.num_steps * c.output_size),
            s2: Vec::with_capacity(c.num_steps * c.output_size),
            counts: vec![0.0; c.output_size],
            inputs: SpikeTrain::zeros(0, 0),
        };
        self.unroll(&train, |u1, s1, u2, s2| {
            rec.u1.extend_from_slice(u1);
            rec.s1.extend_from_slice(s1);
            rec.u2.extend_from_slice(u2);
            rec.s2.extend_from_slice(s2);
            for (c, s) in rec.counts.iter_mut().zip(s2) {
                *c += s;
            }
        })?;
        rec.inputs = train;
        Ok(rec)
    }

    fn check_train(&self, train: &SpikeTrain) -> Result<()> {
        ensure_len("spike train steps", self.config.num_steps, train.num_steps())?;
        ensure_len("spike train channels", self.config.input_size, train.channels())
    }

    /// Core time loop. Membranes start at zero; `visit` sees, per step,
    /// `(u1, s1, u2, s2)` with `u*` the pre-reset potentials.
    ///
    /// Stops with [`SnnError::NonFinite`] at the first step whose potentials
    /// are not all finite; `visit` is not called for that step.
    fn unroll<F>(&self, train: &SpikeTrain, mut visit: F) -> Result<()>
    where
        F: FnMut(&[f32], &[f32], &[f32], &[f32]),
    {
        let hidden = self.config.hidden_size;
        let output = self.config.output_size;
        let mut mem1 = vec![0.0; hidden];
        let mut mem2 = vec![0.0; output];
        let mut s1 = vec![0.0; hidden];
        let mut s2 = vec![0.0; output];
        let mut u1 = vec![0.0; hidden];
        let mut u2 = vec![0.0; output];

        for x in train.steps() {
            self.lif1.step_in_place(x, &mut mem1, &mut s1, &mut u1);
            self.lif2.step_in_place(&s1, &mut mem2, &mut s2, &mut u2);
            if u1.iter().chain(&u2).any(|u| !u.is_finite()) {
                return Err(SnnError::non_finite("membrane potential"));
            }
            visit(&u1, &s1, &u2, &s2);
        }
        Ok(())
    }
}

/// Index of the largest score; the first one wins ties.
pub fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in scores.iter().enumerate().skip(1) {
        if v > scores[best] {
            best = i;
        }
    }
    best
}

/// Independent, reproducible random stream for sample `index` under `seed`.
pub fn sample_rng(seed: u64, index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(index as u64);
    rng
}

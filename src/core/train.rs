//! Surrogate-gradient training: BPTT through the unrolled network plus Adam.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::TrainConfig;
use crate::dataset::{self, Sample};
use crate::error::{ensure_len, Result, SnnError};
use crate::network::{argmax, sample_rng, ExecutionTier, ParamId, SpikingNetwork, Unroll};
use crate::optim::{Adam, Gradients};
use crate::surrogate::{FastSigmoid, SurrogateGradient};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpochStats {
    pub epoch: usize,
    /// Mean per-batch training loss.
    pub loss: f32,
    pub train_accuracy: f32,
    pub val_accuracy: f32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainReport {
    pub epochs: Vec<EpochStats>,
    pub best_val_accuracy: f32,
    /// Validation accuracy after the last epoch.
    pub final_val_accuracy: f32,
}

/// Softmax cross-entropy of `logits` against `label`.
///
/// Returns the loss and its gradient with respect to the logits.
pub fn cross_entropy(logits: &[f32], label: usize) -> (f32, Vec<f32>) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let loss = sum.ln() + max - logits[label];
    let grad = exps
        .iter()
        .enumerate()
        .map(|(i, e)| e / sum - if i == label { 1.0 } else { 0.0 })
        .collect();
    (loss, grad)
}

/// Loss, correctness and gradients of one sample.
struct SampleOutcome {
    loss: f32,
    correct: bool,
    grads: Gradients,
}

/// Drives minibatch training of a [`SpikingNetwork`].
#[derive(Debug, Clone)]
pub struct Trainer<S = FastSigmoid> {
    config: TrainConfig,
    surrogate: S,
}

impl Trainer<FastSigmoid> {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            surrogate: FastSigmoid::default(),
        })
    }
}

impl<S: SurrogateGradient> Trainer<S> {
    pub fn with_surrogate<T: SurrogateGradient>(self, surrogate: T) -> Trainer<T> {
        Trainer {
            config: self.config,
            surrogate,
        }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Train `net` in place and report per-epoch statistics.
    ///
    /// A NaN or infinite loss, gradient or membrane potential aborts the run.
    pub fn train(
        &self,
        net: &mut SpikingNetwork,
        train_set: &[Sample],
        val_set: &[Sample],
    ) -> Result<TrainReport> {
        let classes = net.config().output_size;
        for s in train_set.iter().chain(val_set) {
            if s.label >= classes {
                return Err(SnnError::config(format!(
                    "label {} out of range for {} classes",
                    s.label, classes
                )));
            }
        }

        let cfg = &self.config;
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let mut adam = Adam::new(net, cfg);
        let mut order: Vec<usize> = (0..train_set.len()).collect();
        let (val_x, val_y) = dataset::unzip(val_set);

        info!(
            samples = train_set.len(),
            val_samples = val_set.len(),
            params = net.parameter_count(),
            epochs = cfg.epochs,
            "training started"
        );

        let mut report = TrainReport {
            epochs: Vec::with_capacity(cfg.epochs),
            best_val_accuracy: 0.0,
            final_val_accuracy: 0.0,
        };

        for epoch in 0..cfg.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut correct = 0usize;
            let mut batches = 0usize;

            for (b, chunk) in order.chunks(cfg.batch_size).enumerate() {
                let seed: u64 = rng.gen();
                let (loss, hits, mut grads) = self
                    .batch_gradients(net, train_set, chunk, seed)
                    .map_err(|e| e.at(epoch, b))?;

                let n = chunk.len() as f32;
                let loss = loss / n;
                if !loss.is_finite() {
                    return Err(SnnError::non_finite("loss").at(epoch, b));
                }
                grads.scale(1.0 / n);
                if !grads.is_finite() {
                    return Err(SnnError::non_finite("gradient").at(epoch, b));
                }

                // Exclusive borrow: the batch's readers are all done here.
                adam.step(net, &grads);

                debug!(epoch, batch = b, loss, grad_norm = grads.l2_norm(), "batch");
                loss_sum += loss;
                correct += hits;
                batches += 1;
            }

            let stats = EpochStats {
                epoch,
                loss: if batches > 0 { loss_sum / batches as f32 } else { 0.0 },
                train_accuracy: if train_set.is_empty() {
                    0.0
                } else {
                    correct as f32 / train_set.len() as f32
                },
                val_accuracy: net.accuracy(&val_x, &val_y, rng.gen())?,
            };
            report.best_val_accuracy = report.best_val_accuracy.max(stats.val_accuracy);
            report.final_val_accuracy = stats.val_accuracy;

            if cfg.log_every > 0 && (epoch + 1) % cfg.log_every == 0 {
                info!(
                    "Epoch [{}/{}] Loss: {:.4} Train Acc: {:.4} Val Acc: {:.4}",
                    epoch + 1,
                    cfg.epochs,
                    stats.loss,
                    stats.train_accuracy,
                    stats.val_accuracy
                );
            }
            report.epochs.push(stats);
        }

        info!(
            best_val_accuracy = report.best_val_accuracy,
            final_val_accuracy = report.final_val_accuracy,
            "training complete"
        );
        Ok(report)
    }

    /// Summed loss, correct count and summed gradients over one minibatch.
    fn batch_gradients(
        &self,
        net: &SpikingNetwork,
        samples: &[Sample],
        indices: &[usize],
        seed: u64,
    ) -> Result<(f32, usize, Gradients)> {
        let outcomes = match net.execution_tier() {
            ExecutionTier::Scalar => self.outcomes_scalar(net, samples, indices, seed)?,
            ExecutionTier::Parallel => self.outcomes_parallel(net, samples, indices, seed)?,
        };

        let mut total = Gradients::zeros_like(net);
        let mut loss = 0.0;
        let mut correct = 0;
        for o in &outcomes {
            total.accumulate(&o.grads);
            loss += o.loss;
            correct += usize::from(o.correct);
        }
        Ok((loss, correct, total))
    }

    fn outcomes_scalar(
        &self,
        net: &SpikingNetwork,
        samples: &[Sample],
        indices: &[usize],
        seed: u64,
    ) -> Result<Vec<SampleOutcome>> {
        indices
            .iter()
            .enumerate()
            .map(|(k, &i)| self.sample_outcome(net, &samples[i], &mut sample_rng(seed, k)))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn outcomes_parallel(
        &self,
        net: &SpikingNetwork,
        samples: &[Sample],
        indices: &[usize],
        seed: u64,
    ) -> Result<Vec<SampleOutcome>> {
        indices
            .par_iter()
            .enumerate()
            .map(|(k, &i)| self.sample_outcome(net, &samples[i], &mut sample_rng(seed, k)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn outcomes_parallel(
        &self,
        net: &SpikingNetwork,
        samples: &[Sample],
        indices: &[usize],
        seed: u64,
    ) -> Result<Vec<SampleOutcome>> {
        self.outcomes_scalar(net, samples, indices, seed)
    }

    fn sample_outcome(
        &self,
        net: &SpikingNetwork,
        sample: &Sample,
        rng: &mut ChaCha8Rng,
    ) -> Result<SampleOutcome> {
        ensure_len("features", net.config().input_size, sample.features.len())?;
        let train = net.encoder().encode(&sample.features, rng);
        let rec = net.run_recorded(train)?;
        let (loss, dlogits) = cross_entropy(&rec.counts, sample.label);
        let mut grads = Gradients::zeros_like(net);
        self.backward(net, &rec, &dlogits, &mut grads);
        Ok(SampleOutcome {
            loss,
            correct: argmax(&rec.counts) == sample.label,
            grads,
        })
    }

    /// Backpropagation through time for one recorded unroll.
    ///
    /// `dlogits` is `dL/dcounts`. The reset factor `(1 - s)` is treated as a
    /// constant, and `d s / d u` is replaced by the surrogate derivative.
    pub(crate) fn backward(
        &self,
        net: &SpikingNetwork,
        rec: &Unroll,
        dlogits: &[f32],
        grads: &mut Gradients,
    ) {
        let (lif1, lif2) = net.layers();
        let h = lif1.output_size();
        let c = lif2.output_size();
        let beta = lif1.beta();
        let theta = lif1.threshold();
        let w2 = lif2.weights();

        let mut du1 = vec![0.0; h];
        let mut du2 = vec![0.0; c];
        let mut du1_next = vec![0.0; h];
        let mut du2_next = vec![0.0; c];
        let mut ds1 = vec![0.0; h];

        for t in (0..rec.inputs.num_steps()).rev() {
            let x = rec.inputs.step(t);
            let u1 = &rec.u1[t * h..(t + 1) * h];
            let s1 = &rec.s1[t * h..(t + 1) * h];
            let u2 = &rec.u2[t * c..(t + 1) * c];
            let s2 = &rec.s2[t * c..(t + 1) * c];

            // Output layer: counts = sum_t s2_t, so every step sees dlogits.
            for k in 0..c {
                du2[k] = dlogits[k] * self.surrogate.derivative(u2[k] - theta)
                    + beta * (1.0 - s2[k]) * du2_next[k];
            }
            outer_add(grads.get_mut(ParamId::Lif2Weight), &du2, s1);
            add(grads.get_mut(ParamId::Lif2Bias), &du2);

            // ds1 = W2^T du2
            ds1.fill(0.0);
            for (k, row) in w2.chunks_exact(h).enumerate() {
                let g = du2[k];
                if g == 0.0 {
                    continue;
                }
                for (d, w) in ds1.iter_mut().zip(row) {
                    *d += w * g;
                }
            }

            for j in 0..h {
                du1[j] = ds1[j] * self.surrogate.derivative(u1[j] - theta)
                    + beta * (1.0 - s1[j]) * du1_next[j];
            }
            outer_add(grads.get_mut(ParamId::Lif1Weight), &du1, x);
            add(grads.get_mut(ParamId::Lif1Bias), &du1);

            std::mem::swap(&mut du1, &mut du1_next);
            std::mem::swap(&mut du2, &mut du2_next);
        }
    }
}

/// `dst[i][j] += a[i] * b[j]` for row-major `dst`.
fn outer_add(dst: &mut [f32], a: &[f32], b: &[f32]) {
    for (row, &ai) in dst.chunks_exact_mut(b.len()).zip(a) {
        if ai == 0.0 {
            continue;
        }
        for (d, &bj) in row.iter_mut().zip(b) {
            *d += ai * bj;
        }
    }
}

fn add(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

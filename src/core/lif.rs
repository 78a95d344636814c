//! Leaky integrate-and-fire layer.

use rand::Rng;

use crate::config::LifParams;
use crate::error::{ensure_len, Result, SnnError};

/// Fully connected layer of LIF neurons.
///
/// The layer owns only its parameters. Membrane potentials are carried by the
/// caller, which keeps a step a pure function of `(input, mem)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LifLayer {
    input_size: usize,
    output_size: usize,
    params: LifParams,
    /// Row-major `[output_size][input_size]`.
    pub(crate) weights: Vec<f32>,
    pub(crate) bias: Vec<f32>,
}

impl LifLayer {
    /// Zero-initialised layer.
    pub fn new(input_size: usize, output_size: usize, params: LifParams) -> Result<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(SnnError::config("layer sizes must be > 0"));
        }
        Ok(Self {
            input_size,
            output_size,
            params,
            weights: vec![0.0; input_size * output_size],
            bias: vec![0.0; output_size],
        })
    }

    /// Layer with explicit parameters; `weights` is row-major `[out][in]`.
    pub fn with_parameters(
        input_size: usize,
        output_size: usize,
        params: LifParams,
        weights: Vec<f32>,
        bias: Vec<f32>,
    ) -> Result<Self> {
        let mut layer = Self::new(input_size, output_size, params)?;
        layer.load_parameters(&weights, &bias)?;
        Ok(layer)
    }

    /// Uniform `(-1/sqrt(in), 1/sqrt(in))` initialisation for weights and bias.
    pub fn init_uniform<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let bound = 1.0 / (self.input_size as f32).sqrt();
        for w in self.weights.iter_mut().chain(self.bias.iter_mut()) {
            *w = rng.gen_range(-bound..bound);
        }
    }

    pub fn load_parameters(&mut self, weights: &[f32], bias: &[f32]) -> Result<()> {
        ensure_len("layer weights", self.weights.len(), weights.len())?;
        ensure_len("layer bias", self.bias.len(), bias.len())?;
        self.weights.copy_from_slice(weights);
        self.bias.copy_from_slice(bias);
        Ok(())
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn params(&self) -> &LifParams {
        &self.params
    }

    pub fn beta(&self) -> f32 {
        self.params.beta()
    }

    pub fn threshold(&self) -> f32 {
        self.params.threshold()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// `out = W · input + b`. Lengths are checked by the callers.
    pub(crate) fn synaptic_current(&self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.input_size);
        debug_assert_eq!(out.len(), self.output_size);
        for ((o, row), &b) in out
            .iter_mut()
            .zip(self.weights.chunks_exact(self.input_size))
            .zip(&self.bias)
        {
            *o = b + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
        }
    }

    /// One LIF update. Returns `(output_spikes, new_mem)`.
    pub fn step(&self, input: &[f32], mem: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        ensure_len("input spikes", self.input_size, input.len())?;
        ensure_len("membrane potential", self.output_size, mem.len())?;
        let mut new_mem = mem.to_vec();
        let mut spikes = vec![0.0; self.output_size];
        let mut syn = vec![0.0; self.output_size];
        self.step_in_place(input, &mut new_mem, &mut spikes, &mut syn);
        Ok((spikes, new_mem))
    }

    /// In-place LIF update for the simulation hot path. Lengths are checked
    /// by the callers.
    ///
    /// `mem` holds the previous potential on entry and the post-reset potential
    /// on exit. `syn` is scratch space; on exit it holds the pre-reset
    /// potential `beta * mem + syn`, which the backward pass needs.
    pub(crate) fn step_in_place(&self, input: &[f32], mem: &mut [f32], spikes: &mut [f32], syn: &mut [f32]) {
        self.synaptic_current(input, syn);
        let beta = self.params.beta();
        let threshold = self.params.threshold();
        for ((m, s), u) in mem.iter_mut().zip(spikes.iter_mut()).zip(syn.iter_mut()) {
            *u += beta * *m;
            *s = fire(*u, threshold);
            // Also resets an infinite potential to exactly 0.
            *m = if *s != 0.0 { 0.0 } else { *u };
        }
    }
}

/// Exact Heaviside spike: `1` when the potential reaches the threshold.
#[inline]
pub fn fire(mem: f32, threshold: f32) -> f32 {
    if mem >= threshold {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_to_one() -> LifLayer {
        LifLayer::with_parameters(
            2,
            1,
            LifParams::new(10.0, 1.0).unwrap(),
            vec![1.0, 1.0],
            vec![0.0],
        )
        .unwrap()
    }

    #[test]
    fn coincident_inputs_fire_and_reset() {
        let layer = two_to_one();
        let (spikes, mem) = layer.step(&[1.0, 1.0], &[0.0]).unwrap();
        assert_eq!(spikes, vec![1.0]);
        assert_eq!(mem, vec![0.0]);
    }

    #[test]
    fn silence_after_reset_stays_silent() {
        let layer = two_to_one();
        let (spikes, mem) = layer.step(&[0.0, 0.0], &[0.0]).unwrap();
        assert_eq!(spikes, vec![0.0]);
        assert_eq!(mem, vec![0.0]);
    }

    #[test]
    fn subthreshold_potential_decays() {
        let layer = two_to_one();
        let (spikes, mem) = layer.step(&[0.0, 0.0], &[0.5]).unwrap();
        assert_eq!(spikes, vec![0.0]);
        assert!((mem[0] - 0.5 * (-0.1f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn overflowing_potential_still_resets_to_zero() {
        let layer = LifLayer::with_parameters(
            2,
            1,
            LifParams::new(10.0, 1.0).unwrap(),
            vec![f32::MAX, f32::MAX],
            vec![0.0],
        )
        .unwrap();
        let (spikes, mem) = layer.step(&[1.0, 1.0], &[0.0]).unwrap();
        assert_eq!(spikes, vec![1.0]);
        assert_eq!(mem, vec![0.0]);
    }

    #[test]
    fn non_positive_threshold_fires_constantly() {
        let layer = LifLayer::new(2, 3, LifParams::new(5.0, 0.0).unwrap()).unwrap();
        let (spikes, mem) = layer.step(&[0.0, 0.0], &[0.0; 3]).unwrap();
        assert_eq!(spikes, vec![1.0; 3]);
        assert_eq!(mem, vec![0.0; 3]);
    }

    #[test]
    fn rejects_mismatched_vectors() {
        let layer = two_to_one();
        assert!(matches!(
            layer.step(&[1.0], &[0.0]),
            Err(SnnError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(layer.step(&[1.0, 1.0], &[0.0, 0.0]).is_err());
        assert!(LifLayer::new(0, 1, LifParams::default()).is_err());
    }

    #[test]
    fn init_respects_fan_in_bound() {
        let mut layer = LifLayer::new(16, 8, LifParams::default()).unwrap();
        layer.init_uniform(&mut ChaCha8Rng::seed_from_u64(5));
        let bound = 0.25;
        assert!(layer.weights().iter().all(|w| w.abs() <= bound));
        assert!(layer.bias().iter().all(|b| b.abs() <= bound));
        assert!(layer.weights().iter().any(|&w| w != 0.0));
    }

    proptest! {
        #[test]
        fn spikes_binary_and_fired_neurons_reset(
            weights in prop::collection::vec(-3.0f32..3.0, 12),
            bias in prop::collection::vec(-1.0f32..1.0, 3),
            input in prop::collection::vec(prop::bool::ANY, 4),
            mem in prop::collection::vec(-2.0f32..2.0, 3),
            threshold in -1.0f32..2.0,
        ) {
            let layer = LifLayer::with_parameters(
                4, 3, LifParams::new(10.0, threshold).unwrap(), weights, bias,
            ).unwrap();
            let input: Vec<f32> = input.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect();
            let (spikes, new_mem) = layer.step(&input, &mem).unwrap();
            for (s, m) in spikes.iter().zip(&new_mem) {
                prop_assert!(*s == 0.0 || *s == 1.0);
                if *s == 1.0 {
                    prop_assert_eq!(*m, 0.0);
                }
            }
        }
    }
}

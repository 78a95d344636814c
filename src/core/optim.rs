//! Adam optimiser over the network's fixed parameter set.

use crate::config::TrainConfig;
use crate::network::{ParamId, SpikingNetwork};

/// Gradient buffers shaped like the network parameters, indexed by [`ParamId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    tensors: [Vec<f32>; 4],
}

impl Gradients {
    pub fn zeros_like(net: &SpikingNetwork) -> Self {
        Self {
            tensors: ParamId::ALL.map(|id| vec![0.0; net.param(id).len()]),
        }
    }

    pub fn get(&self, id: ParamId) -> &[f32] {
        &self.tensors[id.index()]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut [f32] {
        &mut self.tensors[id.index()]
    }

    /// Element-wise `self += other`.
    pub fn accumulate(&mut self, other: &Gradients) {
        for (dst, src) in self.tensors.iter_mut().zip(&other.tensors) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for t in &mut self.tensors {
            for g in t.iter_mut() {
                *g *= factor;
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        self.tensors.iter().flatten().all(|g| g.is_finite())
    }

    pub fn l2_norm(&self) -> f32 {
        self.tensors
            .iter()
            .flatten()
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt()
    }
}

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    pub fn new(net: &SpikingNetwork, cfg: &TrainConfig) -> Self {
        Self {
            lr: cfg.learning_rate,
            beta1: cfg.beta1,
            beta2: cfg.beta2,
            eps: cfg.epsilon,
            t: 0,
            m: Gradients::zeros_like(net),
            v: Gradients::zeros_like(net),
        }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update. Takes the network exclusively: no forward pass can
    /// observe a half-updated parameter set.
    pub fn step(&mut self, net: &mut SpikingNetwork, grads: &Gradients) {
        self.t = self.t.saturating_add(1);
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);

        for id in ParamId::ALL {
            let params = net.param_mut(id);
            let g = grads.get(id);
            let m = self.m.get_mut(id);
            let v = self.v.get_mut(id);
            for i in 0..params.len() {
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g[i];
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g[i] * g[i];
                let m_hat = m[i] / bc1;
                let v_hat = v[i] / bc2;
                params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}

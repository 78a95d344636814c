use crate::config::NetworkConfig;
use crate::error::Result;
use crate::network::{sample_rng, SpikingNetwork};

/// A read-only snapshot of a network's parameters.
///
/// Observers cannot mutate the network. Snapshotting allocates, so call it
/// between epochs or after training, not inside a forward pass.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    pub config: NetworkConfig,
    pub parameter_count: usize,
    pub tensors: Vec<TensorSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorSummary {
    pub name: String,
    pub shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
    pub mean_abs: f32,
}

/// Firing activity averaged over a set of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActivityReport {
    pub samples: usize,
    pub mean_hidden_rate: f32,
    pub mean_output_rate: f32,
    /// Samples for which no output neuron fired at all.
    pub silent_outputs: usize,
}

pub struct NetworkAdapter<'a> {
    net: &'a SpikingNetwork,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(net: &'a SpikingNetwork) -> Self {
        Self { net }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        let tensors = self
            .net
            .parameters()
            .into_iter()
            .map(|t| {
                let (min, max) = t
                    .data
                    .iter()
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                let mean_abs = if t.data.is_empty() {
                    0.0
                } else {
                    t.data.iter().map(|v| v.abs()).sum::<f32>() / t.data.len() as f32
                };
                TensorSummary {
                    name: t.name.to_string(),
                    shape: t.shape,
                    min,
                    max,
                    mean_abs,
                }
            })
            .collect();

        NetworkSnapshot {
            config: *self.net.config(),
            parameter_count: self.net.parameter_count(),
            tensors,
        }
    }

    /// Run traced forward passes; sample `i` uses `sample_rng(seed, i)`.
    pub fn activity<S: AsRef<[f32]>>(&self, samples: &[S], seed: u64) -> Result<ActivityReport> {
        let mut report = ActivityReport {
            samples: samples.len(),
            ..Default::default()
        };
        for (i, s) in samples.iter().enumerate() {
            let (_, stats) = self.net.forward_traced(s.as_ref(), &mut sample_rng(seed, i))?;
            report.mean_hidden_rate += stats.hidden_rate;
            report.mean_output_rate += stats.output_rate;
            if stats.output_spikes == 0 {
                report.silent_outputs += 1;
            }
        }
        if !samples.is_empty() {
            report.mean_hidden_rate /= samples.len() as f32;
            report.mean_output_rate /= samples.len() as f32;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ParamId;

    #[test]
    fn snapshot_summarises_every_tensor() {
        let mut net = SpikingNetwork::new(NetworkConfig::with_size(2, 3, 2)).unwrap();
        net.set_param(ParamId::Lif2Bias, &[-1.0, 3.0]).unwrap();
        let snap = NetworkAdapter::new(&net).snapshot();

        assert_eq!(snap.parameter_count, 6 + 3 + 6 + 2);
        assert_eq!(snap.tensors.len(), 4);
        let bias = &snap.tensors[3];
        assert_eq!(bias.name, "lif2.fc.bias");
        assert_eq!((bias.min, bias.max, bias.mean_abs), (-1.0, 3.0, 2.0));
    }

    #[test]
    fn silent_network_reports_silent_outputs() {
        let net = SpikingNetwork::new(NetworkConfig::with_size(2, 3, 2)).unwrap();
        let samples = vec![vec![0.5, -0.5]; 4];
        let report = NetworkAdapter::new(&net).activity(&samples, 9).unwrap();
        assert_eq!(report.samples, 4);
        assert_eq!(report.silent_outputs, 4);
        assert_eq!(report.mean_hidden_rate, 0.0);
    }

    #[test]
    fn always_firing_network_has_unit_rates() {
        let cfg = NetworkConfig::with_size(2, 3, 2).with_threshold(0.0);
        let net = SpikingNetwork::new(cfg).unwrap();
        let report = NetworkAdapter::new(&net).activity(&[[0.1f32, 0.2]], 0).unwrap();
        assert_eq!(report.mean_hidden_rate, 1.0);
        assert_eq!(report.mean_output_rate, 1.0);
        assert_eq!(report.silent_outputs, 0);
    }
}

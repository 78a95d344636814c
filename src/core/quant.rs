//! Per-tensor symmetric INT8 quantization.
//!
//! `scale = max|x| / 127` (or `1.0` for an all-zero tensor) and
//! `q = clamp(round(x / scale), -127, 127)`. Rounding is
//! round-half-away-from-zero (`f32::round`): `0.5 -> 1`, `-0.5 -> -1`,
//! `2.5 -> 3`. There is no zero point.
//!
//! The scale is never zero: when `max|x| / 127` underflows (subnormal
//! tensors), the all-zero fallback `1.0` is used and every element
//! quantizes to `0`, which is still within half a step.

use crate::config::NetworkConfig;
use crate::error::{ensure_len, Result, SnnError};
use crate::network::{ParamId, SpikingNetwork, TensorRef};

pub const QMAX: i8 = 127;

/// One quantized tensor: name, shape, scale and row-major INT8 data.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub scale: f32,
    pub data: Vec<i8>,
}

impl QuantRecord {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// `q * scale` for every element.
    pub fn dequantize(&self) -> Vec<f32> {
        self.data.iter().map(|&q| q as f32 * self.scale).collect()
    }

    /// Check the record's own invariants (used after reading a file).
    pub fn validate(&self) -> Result<()> {
        ensure_len("quantized data", self.element_count(), self.data.len())?;
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(SnnError::format(format!(
                "record {} has invalid scale {}",
                self.name, self.scale
            )));
        }
        if self.data.contains(&i8::MIN) {
            return Err(SnnError::format(format!(
                "record {} contains -128",
                self.name
            )));
        }
        Ok(())
    }
}

/// Scale for a tensor: `max|x| / 127`, or `1.0` if that is not positive
/// (all-zero tensor, or an underflowing maximum).
pub fn symmetric_scale(data: &[f32]) -> f32 {
    let abs_max = data.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    let scale = abs_max / QMAX as f32;
    if scale > 0.0 {
        scale
    } else {
        1.0
    }
}

/// Quantize a single value with `scale`, saturating at `±127`.
#[inline]
pub fn quantize_value(x: f32, scale: f32) -> i8 {
    (x / scale).round().clamp(-(QMAX as f32), QMAX as f32) as i8
}

pub fn quantize_tensor(tensor: &TensorRef<'_>) -> Result<QuantRecord> {
    let expected: usize = tensor.shape.iter().product();
    ensure_len("tensor data", expected, tensor.data.len())?;
    if tensor.data.iter().any(|x| !x.is_finite()) {
        return Err(SnnError::non_finite("tensor data"));
    }
    let scale = symmetric_scale(tensor.data);
    Ok(QuantRecord {
        name: tensor.name.to_string(),
        shape: tensor.shape.clone(),
        scale,
        data: tensor.data.iter().map(|&x| quantize_value(x, scale)).collect(),
    })
}

/// Quantize every tensor independently, preserving order.
pub fn quantize(tensors: &[TensorRef<'_>]) -> Result<Vec<QuantRecord>> {
    tensors.iter().map(quantize_tensor).collect()
}

impl SpikingNetwork {
    /// Quantized records of all parameters, in export order.
    pub fn quantize(&self) -> Result<Vec<QuantRecord>> {
        quantize(&self.parameters())
    }

    /// Rebuild an inference network from INT8 records.
    ///
    /// Every parameter of `config` must be present exactly once with the
    /// expected shape; weights are the dequantized values.
    pub fn from_quantized(config: NetworkConfig, records: &[QuantRecord]) -> Result<Self> {
        let mut net = SpikingNetwork::new(config)?;
        let mut seen = [false; 4];
        for rec in records {
            let id = ParamId::from_name(&rec.name)
                .ok_or_else(|| SnnError::format(format!("unknown tensor {}", rec.name)))?;
            if std::mem::replace(&mut seen[id.index()], true) {
                return Err(SnnError::format(format!("duplicate tensor {}", rec.name)));
            }
            let expected = net.param_shape(id);
            if rec.shape != expected {
                return Err(SnnError::format(format!(
                    "tensor {} has shape {:?}, expected {:?}",
                    rec.name, rec.shape, expected
                )));
            }
            rec.validate()?;
            net.set_param(id, &rec.dequantize())?;
        }
        if let Some(missing) = ParamId::ALL.into_iter().find(|id| !seen[id.index()]) {
            return Err(SnnError::format(format!("missing tensor {}", missing.name())));
        }
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tensor<'a>(name: &'a str, shape: &[usize], data: &'a [f32]) -> TensorRef<'a> {
        TensorRef {
            name,
            shape: shape.to_vec(),
            data,
        }
    }

    #[test]
    fn quantizes_reference_vector() {
        let data = [-2.0, 1.0, 0.0, 2.0];
        let rec = quantize_tensor(&tensor("w", &[4], &data)).unwrap();
        assert!((rec.scale - 2.0 / 127.0).abs() < 1e-9);
        assert!((rec.scale - 0.015748).abs() < 1e-6);
        // 1.0 / scale == 63.5 rounds away from zero.
        assert_eq!(rec.data, vec![-127, 64, 0, 127]);
    }

    #[test]
    fn all_zero_tensor_uses_unit_scale() {
        let data = [0.0; 6];
        let rec = quantize_tensor(&tensor("b", &[2, 3], &data)).unwrap();
        assert_eq!(rec.scale, 1.0);
        assert_eq!(rec.data, vec![0; 6]);
        assert_eq!(rec.dequantize(), vec![0.0; 6]);
    }

    #[test]
    fn subnormal_tensor_falls_back_to_unit_scale() {
        let data = [1e-44, -5e-45];
        let rec = quantize_tensor(&tensor("p.bias", &[2], &data)).unwrap();
        assert_eq!(rec.scale, 1.0);
        assert_eq!(rec.data, vec![0, 0]);
        assert!(rec.validate().is_ok());

        let mut buf = Vec::new();
        crate::storage::write_weight_file(&mut buf, &[rec]).unwrap();
    }

    #[test]
    fn ties_round_away_from_zero() {
        assert_eq!(quantize_value(0.5, 1.0), 1);
        assert_eq!(quantize_value(-0.5, 1.0), -1);
        assert_eq!(quantize_value(2.5, 1.0), 3);
        assert_eq!(quantize_value(-2.5, 1.0), -3);
        assert_eq!(quantize_value(1.49, 1.0), 1);
    }

    #[test]
    fn outliers_saturate() {
        assert_eq!(quantize_value(1000.0, 1.0), 127);
        assert_eq!(quantize_value(-1000.0, 1.0), -127);
    }

    #[test]
    fn rejects_bad_tensors() {
        let data = [1.0, f32::NAN];
        assert!(matches!(
            quantize_tensor(&tensor("w", &[2], &data)),
            Err(SnnError::NonFinite { .. })
        ));
        let data = [1.0, 2.0, 3.0];
        assert!(quantize_tensor(&tensor("w", &[2, 2], &data)).is_err());
    }

    #[test]
    fn empty_mapping_quantizes_to_nothing() {
        assert!(quantize(&[]).unwrap().is_empty());
    }

    #[test]
    fn network_round_trips_through_int8() {
        let cfg = NetworkConfig::with_size(6, 12, 3);
        let net = SpikingNetwork::init(cfg, &mut ChaCha8Rng::seed_from_u64(8)).unwrap();
        let records = net.quantize().unwrap();
        assert_eq!(records.len(), 4);

        let restored = SpikingNetwork::from_quantized(cfg, &records).unwrap();
        for (orig, rec) in net.parameters().iter().zip(&records) {
            let back = restored.param(ParamId::from_name(&rec.name).unwrap());
            for (a, b) in orig.data.iter().zip(back) {
                assert!((a - b).abs() <= rec.scale / 2.0 + 1e-7);
            }
        }
    }

    #[test]
    fn from_quantized_validates_records() {
        let cfg = NetworkConfig::with_size(2, 2, 2);
        let net = SpikingNetwork::new(cfg).unwrap();
        let records = net.quantize().unwrap();

        assert!(SpikingNetwork::from_quantized(cfg, &records[..3]).is_err());

        let mut dup = records.clone();
        dup.push(records[0].clone());
        assert!(SpikingNetwork::from_quantized(cfg, &dup).is_err());

        let mut wrong_shape = records.clone();
        wrong_shape[0].shape = vec![4, 1];
        assert!(SpikingNetwork::from_quantized(cfg, &wrong_shape).is_err());

        let mut unknown = records;
        unknown[1].name = "lif1.fc.gamma".into();
        assert!(SpikingNetwork::from_quantized(cfg, &unknown).is_err());
    }

    proptest! {
        #[test]
        fn round_trip_error_within_half_scale(
            data in prop::collection::vec(-50.0f32..50.0, 1..64),
        ) {
            let rec = quantize_tensor(&tensor("t", &[data.len()], &data)).unwrap();
            prop_assert!(rec.scale > 0.0);
            for (x, q) in data.iter().zip(rec.dequantize()) {
                // Half a step plus f32 rounding slack.
                prop_assert!((x - q).abs() <= rec.scale / 2.0 + rec.scale * 1e-3);
            }
            prop_assert!(rec.data.iter().all(|&q| (-127..=127).contains(&q)));
        }
    }
}

//! # spikegest
//!
//! A two-layer spiking neural network for IMU gesture classification.
//!
//! Input features are rate- (or latency-) encoded into binary spike trains,
//! driven through two layers of leaky integrate-and-fire neurons, and
//! classified by output spike count. Training uses backpropagation through
//! time with a surrogate gradient; trained weights export to a compact
//! per-tensor INT8 file for embedded inference.
//!
//! ## Quick Start
//!
//! ```
//! use spikegest::prelude::*;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let cfg = NetworkConfig::with_size(6, 32, 6).with_steps(10);
//! let net = SpikingNetwork::init(cfg, &mut rng).unwrap();
//!
//! let counts = net.forward(&[0.1, -0.3, 0.8, 0.0, 0.2, -0.9], &mut rng).unwrap();
//! assert_eq!(counts.len(), 6);
//! assert!(counts.iter().all(|&c| (0.0..=10.0).contains(&c)));
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): JSON configuration files and checkpoints
//! - `parallel`: Score and train independent samples on a rayon pool
//!
//! ## Modules
//!
//! - [`encoder`]: Features to spike trains
//! - [`lif`]: Leaky integrate-and-fire layer
//! - [`network`]: The two-layer network and batch inference
//! - [`train`]: Surrogate-gradient BPTT with Adam
//! - [`quant`] / [`storage`]: INT8 quantization and the weight file
//! - [`observer`]: Read-only parameter and activity snapshots

#[path = "core/error.rs"]
pub mod error;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/encoder.rs"]
pub mod encoder;

#[path = "core/lif.rs"]
pub mod lif;

#[path = "core/surrogate.rs"]
pub mod surrogate;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/optim.rs"]
pub mod optim;

#[path = "core/train.rs"]
pub mod train;

#[path = "core/dataset.rs"]
pub mod dataset;

#[path = "core/quant.rs"]
pub mod quant;

#[path = "core/storage.rs"]
pub mod storage;

#[cfg(feature = "serde")]
#[path = "core/checkpoint.rs"]
pub mod checkpoint;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use spikegest::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Encoding, LifParams, NetworkConfig, TrainConfig};
    pub use crate::dataset::{stratified_split, Sample, SyntheticImu};
    pub use crate::encoder::{SpikeEncoder, SpikeTrain};
    pub use crate::error::{Result, SnnError};
    pub use crate::lif::LifLayer;
    pub use crate::network::{argmax, ExecutionTier, ParamId, SpikingNetwork};
    pub use crate::quant::QuantRecord;
    pub use crate::surrogate::{Arctan, FastSigmoid, SurrogateGradient};
    pub use crate::train::{TrainReport, Trainer};
}

//! Full-precision JSON checkpoint: the network configuration plus the
//! four named float tensors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::NetworkConfig;
use crate::error::{Result, SnnError};
use crate::network::{ParamId, SpikingNetwork};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub config: NetworkConfig,
    pub tensors: Vec<NamedTensor>,
}

impl Checkpoint {
    pub fn from_network(net: &SpikingNetwork) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            config: *net.config(),
            tensors: net
                .parameters()
                .into_iter()
                .map(|t| NamedTensor {
                    name: t.name.to_string(),
                    shape: t.shape,
                    data: t.data.to_vec(),
                })
                .collect(),
        }
    }

    /// Rebuild the network; every tensor must match the configured shape.
    pub fn into_network(self) -> Result<SpikingNetwork> {
        if self.version != CHECKPOINT_VERSION {
            return Err(SnnError::format(format!(
                "unsupported checkpoint version {}",
                self.version
            )));
        }
        let mut net = SpikingNetwork::new(self.config)?;
        let mut seen = [false; 4];
        for t in &self.tensors {
            let id = ParamId::from_name(&t.name)
                .ok_or_else(|| SnnError::format(format!("unknown tensor {}", t.name)))?;
            if std::mem::replace(&mut seen[id.index()], true) {
                return Err(SnnError::format(format!("duplicate tensor {}", t.name)));
            }
            if t.shape != net.param_shape(id) {
                return Err(SnnError::format(format!(
                    "tensor {} has shape {:?}, expected {:?}",
                    t.name,
                    t.shape,
                    net.param_shape(id)
                )));
            }
            net.set_param(id, &t.data)?;
        }
        if let Some(missing) = ParamId::ALL.into_iter().find(|id| !seen[id.index()]) {
            return Err(SnnError::format(format!("missing tensor {}", missing.name())));
        }
        Ok(net)
    }

    pub fn write_to<W: Write>(&self, w: W) -> Result<()> {
        serde_json::to_writer_pretty(w, self)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: R) -> Result<Self> {
        Ok(serde_json::from_reader(r)?)
    }
}

pub fn save_checkpoint(net: &SpikingNetwork, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut w = BufWriter::new(File::create(path)?);
    Checkpoint::from_network(net).write_to(&mut w)?;
    w.flush()?;
    info!(path = %path.display(), params = net.parameter_count(), "saved checkpoint");
    Ok(())
}

pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<SpikingNetwork> {
    let r = BufReader::new(File::open(path)?);
    Checkpoint::read_from(r)?.into_network()
}

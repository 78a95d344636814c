//! spikegest - train, evaluate and inspect the spiking gesture classifier.
//!
//! Logging goes through `tracing`; set `RUST_LOG=debug` for per-batch lines.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spikegest::checkpoint::save_checkpoint;
use spikegest::dataset::{self, stratified_split, SyntheticImu};
use spikegest::observer::NetworkAdapter;
use spikegest::prelude::*;
use spikegest::storage::{encoded_len, load_weight_file};

const WEIGHTS_FILE: &str = "lif_gesture_weights.bin";
const CHECKPOINT_FILE: &str = "snn_gesture_checkpoint.json";
const VAL_FRACTION: f32 = 0.2;

#[derive(Parser, Debug)]
#[command(name = "spikegest", version, about = "Spiking gesture classifier", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on synthetic IMU data and export INT8 weights plus a checkpoint
    Train(TrainArgs),
    /// Accuracy of an exported INT8 network on fresh synthetic data
    Eval(EvalArgs),
    /// List the records of a weight file
    Inspect {
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// JSON file with optional `network` and `train` sections
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "./models/snn")]
    output_dir: PathBuf,

    /// Synthetic windows to generate (split 80/20 into train/validation)
    #[arg(long, default_value_t = 2000)]
    num_samples: usize,

    #[arg(long)]
    num_classes: Option<usize>,

    #[arg(long)]
    hidden_size: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    lr: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct EvalArgs {
    #[arg(long)]
    weights: PathBuf,

    /// Network dynamics (steps, tau, threshold, encoding); sizes come from the file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 500)]
    num_samples: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunConfig {
    network: NetworkConfig,
    train: TrainConfig,
}

impl RunConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match args.command {
        Command::Train(a) => train(a),
        Command::Eval(a) => eval(a),
        Command::Inspect { file } => inspect(&file),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let RunConfig {
        mut network,
        train: mut train_cfg,
    } = RunConfig::load(args.config.as_deref())?;

    if let Some(c) = args.num_classes {
        network.output_size = c;
    }
    if let Some(h) = args.hidden_size {
        network.hidden_size = h;
    }
    if let Some(e) = args.epochs {
        train_cfg = train_cfg.with_epochs(e);
    }
    if let Some(b) = args.batch_size {
        train_cfg = train_cfg.with_batch_size(b);
    }
    if let Some(lr) = args.lr {
        train_cfg = train_cfg.with_learning_rate(lr);
    }
    if let Some(s) = args.seed {
        train_cfg = train_cfg.with_seed(s);
    }
    network.input_size = dataset::IMU_CHANNELS;
    network.validate()?;

    let mut rng = ChaCha8Rng::seed_from_u64(train_cfg.seed);
    let samples = SyntheticImu::with_classes(network.output_size).generate(args.num_samples, &mut rng)?;
    let (train_set, val_set) = stratified_split(samples, VAL_FRACTION, &mut rng)?;
    if train_set.is_empty() {
        bail!("no training samples; increase --num-samples");
    }

    let mut net = SpikingNetwork::init(network, &mut rng)?;
    if cfg!(feature = "parallel") {
        net.set_execution_tier(ExecutionTier::Parallel);
    }

    let report = Trainer::new(train_cfg)?.train(&mut net, &train_set, &val_set)?;
    info!(
        best_val_accuracy = report.best_val_accuracy,
        final_val_accuracy = report.final_val_accuracy,
        "training finished"
    );

    let (val_x, _) = dataset::unzip(&val_set);
    let activity = NetworkAdapter::new(&net).activity(&val_x, train_cfg.seed)?;
    info!(
        hidden_rate = activity.mean_hidden_rate,
        output_rate = activity.mean_output_rate,
        silent = activity.silent_outputs,
        "validation firing activity"
    );
    if activity.samples > 0 && activity.silent_outputs == activity.samples {
        warn!("no output neuron fired on any validation sample");
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let weights = args.output_dir.join(WEIGHTS_FILE);
    let records = net
        .export(&weights)
        .with_context(|| format!("exporting {}", weights.display()))?;
    save_checkpoint(&net, args.output_dir.join(CHECKPOINT_FILE))?;

    println!(
        "final validation accuracy: {:.2}%",
        report.final_val_accuracy * 100.0
    );
    println!(
        "wrote {} ({} bytes, {} tensors)",
        weights.display(),
        encoded_len(&records)?,
        records.len()
    );
    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let records = load_weight_file(&args.weights)
        .with_context(|| format!("reading {}", args.weights.display()))?;
    let shape_of = |name: &str| {
        records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.shape.clone())
            .with_context(|| format!("{} is missing {name}", args.weights.display()))
    };
    let w1 = shape_of(ParamId::Lif1Weight.name())?;
    let w2 = shape_of(ParamId::Lif2Weight.name())?;

    let mut network = RunConfig::load(args.config.as_deref())?.network;
    network.hidden_size = w1[0];
    network.input_size = w1[1];
    network.output_size = w2[0];
    if w2[1] != w1[0] {
        bail!("hidden sizes disagree: {:?} vs {:?}", w1, w2);
    }

    let net = SpikingNetwork::from_quantized(network, &records)?;
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let samples = SyntheticImu::with_classes(network.output_size).generate(args.num_samples, &mut rng)?;
    let (x, y) = dataset::unzip(&samples);
    let acc = net.accuracy(&x, &y, args.seed)?;

    info!(samples = samples.len(), accuracy = acc, "evaluated INT8 network");
    println!("INT8 accuracy: {:.2}% on {} samples", acc * 100.0, samples.len());
    Ok(())
}

fn inspect(file: &Path) -> Result<()> {
    let records =
        load_weight_file(file).with_context(|| format!("reading {}", file.display()))?;
    println!("{}: {} records", file.display(), records.len());
    for r in &records {
        println!(
            "  {:<16} {:<10} scale={:<12.6e} {} bytes",
            r.name,
            format!("{:?}", r.shape),
            r.scale,
            r.data.len()
        );
    }
    println!("total: {} bytes", encoded_len(&records)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_defaults() {
        let args = Args::try_parse_from(["spikegest", "train"]).unwrap();
        let Command::Train(a) = args.command else {
            panic!("expected train");
        };
        assert_eq!(a.num_samples, 2000);
        assert_eq!(a.output_dir, PathBuf::from("./models/snn"));
        assert!(a.epochs.is_none() && a.config.is_none());
    }

    #[test]
    fn eval_requires_weights() {
        assert!(Args::try_parse_from(["spikegest", "eval"]).is_err());
        let args =
            Args::try_parse_from(["spikegest", "eval", "--weights", "w.bin", "--seed", "3"]).unwrap();
        let Command::Eval(a) = args.command else {
            panic!("expected eval");
        };
        assert_eq!(a.weights, PathBuf::from("w.bin"));
        assert_eq!(a.seed, 3);
    }
}

//! Builds a FeUdal or GA3C network, runs optimisation steps on synthetic
//! observations, writes summaries and saves the parameters.
mod run;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Network {
    /// FeUdal network
    Fun,
    /// GA3C actor-critic network
    Gac,
}

/// Smoke run of the feudal networks
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Network to build
    #[arg(value_enum)]
    network: Network,

    /// Directory of the configuration, summaries and checkpoints
    #[arg(long, default_value = "./model")]
    model_dir: PathBuf,

    /// Write the default configuration into the model directory and exit
    #[arg(long, default_value_t = false)]
    create_config: bool,

    /// Restore the parameters saved in the model directory
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Number of optimisation steps
    #[arg(long, default_value_t = 1)]
    steps: usize,

    /// Number of transitions per rollout
    #[arg(long, default_value_t = 16)]
    rollout_len: usize,

    /// Overrides the number of actions of the configuration
    #[arg(long)]
    nb_actions: Option<i64>,

    /// Overrides the learning rate of the configuration
    #[arg(long)]
    lr: Option<f64>,

    /// Run on CPU even if a GPU is available
    #[arg(long, default_value_t = false)]
    cpu: bool,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: i64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    tch::manual_seed(args.seed);
    fastrand::seed(args.seed as u64);

    let opts = run::RunOptions {
        model_dir: args.model_dir.join(match args.network {
            Network::Fun => "fun",
            Network::Gac => "gac",
        }),
        resume: args.resume,
        steps: args.steps,
        rollout_len: args.rollout_len,
        nb_actions: args.nb_actions,
        lr: args.lr,
        device: args.cpu.then_some(tch::Device::Cpu),
    };

    match (args.network, args.create_config) {
        (Network::Fun, true) => run::create_fun_config(&opts),
        (Network::Gac, true) => run::create_gac_config(&opts),
        (Network::Fun, false) => run::run_fun(&opts),
        (Network::Gac, false) => run::run_gac(&opts),
    }
}

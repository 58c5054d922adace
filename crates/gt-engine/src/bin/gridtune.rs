//! Gridtune command line: grid sweeps and side-by-side trainer actors.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gt_engine::{spawn_trainer, ConvNetRunner, DataSourceKind, RunSettings, TrainBackend};
use gt_optimizer::{ExperimentConfig, GridSearch, SearchSpace, Sweep};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "gridtune",
    about = "Grid search over SGD hyperparameters for a small MNIST classifier"
)]
struct Cli {
    /// JSON file with run settings (data source, lock path, loop sizes)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Data source: mnist or synthetic
    #[arg(long, global = true)]
    data_source: Option<DataSourceKind>,

    /// Lock file serializing the dataset download
    #[arg(long, global = true)]
    lock_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train and evaluate one model per grid point and print the results
    Sweep(SweepArgs),

    /// Step one trainer actor per grid point, all at once
    Actors(ActorArgs),
}

#[derive(Args)]
struct GridArgs {
    /// Learning rates to try
    #[arg(long, value_delimiter = ',', default_values_t = [0.001, 0.01, 0.1])]
    lr: Vec<f64>,

    /// Momentum values to try
    #[arg(long, value_delimiter = ',', default_values_t = [0.001, 0.01, 0.1, 0.9])]
    momentum: Vec<f64>,
}

impl GridArgs {
    fn space(&self) -> SearchSpace {
        SearchSpace::new()
            .add_values("lr", self.lr.clone())
            .add_values("momentum", self.momentum.clone())
    }
}

#[derive(Args)]
struct SweepArgs {
    /// Experiment JSON; replaces the --lr/--momentum grid
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    grid: GridArgs,

    /// Train/evaluate rounds per trial
    #[arg(long)]
    rounds: Option<usize>,

    /// Trials to run at once
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Record failed trials and carry on instead of aborting
    #[arg(long)]
    keep_going: bool,

    /// Write the full report as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ActorArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Steps to run on every actor
    #[arg(long, default_value_t = 3)]
    steps: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let settings = run_settings(&cli)?;
    info!(
        "Data source {} (lock {})",
        settings.data_source,
        settings.lock_path().display()
    );

    match &cli.command {
        Command::Sweep(args) => sweep(args, &settings),
        Command::Actors(args) => actors(args, &settings),
    }
}

fn run_settings(cli: &Cli) -> anyhow::Result<RunSettings> {
    let settings = match &cli.settings {
        Some(path) => RunSettings::load(path)?,
        None => RunSettings::default(),
    };
    let mut settings = settings.with_env()?;
    if let Some(kind) = cli.data_source {
        settings.data_source = kind;
    }
    if let Some(path) = &cli.lock_path {
        settings.lock_path = Some(path.clone());
    }
    settings.validate()?;
    Ok(settings)
}

fn sweep(args: &SweepArgs, settings: &RunSettings) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading experiment {}", path.display()))?;
            serde_json::from_str::<ExperimentConfig>(&text)
                .with_context(|| format!("parsing experiment {}", path.display()))?
        }
        None => ExperimentConfig::new("mnist-sgd", args.grid.space()),
    };
    if let Some(rounds) = args.rounds {
        config.rounds = rounds;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.keep_going {
        config.fail_fast = false;
    }

    let sweep = Sweep::new(config)?;
    let runner = ConvNetRunner::<TrainBackend>::new(
        settings.build_source(),
        settings.loop_settings.clone(),
        Default::default(),
    );
    let report = sweep.run(&runner)?;

    println!("{}", report.table());

    if let Some(path) = &args.output {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn actors(args: &ActorArgs, settings: &RunSettings) -> anyhow::Result<()> {
    let space = args.grid.space();
    space.validate()?;
    let source = settings.build_source();

    let trainers = GridSearch::new(&space, 1)
        .enumerate()
        .map(|(i, configuration)| {
            let label = configuration.to_string();
            let actor = spawn_trainer::<TrainBackend>(
                format!("trainer-{i}"),
                configuration,
                source.clone(),
                settings.loop_settings.clone(),
                args.seed.wrapping_add(i as u64),
                Default::default(),
            )?;
            Ok((label, actor))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!("Started {} trainer actors", trainers.len());

    let mut histories = vec![Vec::with_capacity(args.steps); trainers.len()];
    for step in 1..=args.steps {
        let replies = trainers
            .iter()
            .map(|(_, actor)| actor.ask(|trainable| trainable.step()))
            .collect::<Result<Vec<_>, _>>()?;
        for (history, reply) in histories.iter_mut().zip(replies) {
            history.push(reply.wait()?);
        }
        info!("Step {}/{} done on every actor", step, args.steps);
    }

    for ((label, actor), history) in trainers.into_iter().zip(&histories) {
        let metrics: Vec<String> = history.iter().map(|m| format!("{m:.4}")).collect();
        println!("{:<10} {:<28} {}", actor.name(), label, metrics.join(" "));
        actor.stop()?;
    }
    Ok(())
}

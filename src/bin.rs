use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use unitnet::{LogObserver, Network, NetworkConfig, UnitSpec, WeightInit};

/// Trains a single self-looping input unit, unrolled three steps, to flip the
/// sign of its input.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Starting value of the loop weight (random when omitted)
    #[arg(short, long, allow_negative_numbers = true)]
    weight: Option<f64>,

    #[arg(short, long, default_value_t = 10_000)]
    runs: usize,

    /// Seed for the random starting weight
    #[arg(short, long)]
    seed: Option<u64>,

    /// Write the trained graph as Graphviz
    #[arg(long)]
    dot: Option<PathBuf>,

    /// Log every field change at TRACE level
    #[arg(long)]
    watch: bool,
}

const UNROLL: usize = 3;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.watch { Level::TRACE } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let xs = [-1.0, 1.0];
    let ys = [1.0, -1.0];

    let mut net = Network::<f64>::with_config(NetworkConfig {
        seed: args.seed,
        ..NetworkConfig::default()
    });
    if args.watch {
        net.subscribe(LogObserver);
    }
    let unit = net.add_unit(UnitSpec::input().label("x"))?;
    let init = match args.weight {
        Some(value) => WeightInit::Value(value),
        None => WeightInit::Random,
    };
    let loop_weight = net.add_output(unit, unit, init)?;
    info!(
        "weight starts at {:.4}",
        net.connection(loop_weight)?.value()
    );

    let report_every = (args.runs / 10).max(1);
    for run in 0..=args.runs {
        let index = run % xs.len();
        net.update(unit, xs[index])?;
        for _ in 0..UNROLL {
            net.go(unit)?;
        }
        net.forward(unit)?;
        net.inject_error(unit, |y| y - ys[index])?;
        for _ in 0..UNROLL {
            net.backprop(unit, false)?;
        }
        net.commit(loop_weight)?;
        net.reset(unit)?;

        if run % report_every == 0 {
            info!(run, "weight is now {:.4}", net.connection(loop_weight)?.value());
        }
    }

    if let Some(path) = args.dot {
        net.write_dot(path)?;
    }
    Ok(())
}

//! `ring-matvec` command-line interface.
//!
//! ```sh
//! ring-matvec -n 4                      # random 8x8 matrix and vector
//! ring-matvec -n 2 matrix.txt --vector vector.txt
//! RUST_LOG=debug ring-matvec -n 3 --size 9 --seed 42
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::debug;

use ring_matvec::comm::{Communicator, World};
use ring_matvec::config::{MatrixSource, RunConfig, DEFAULT_PROCESSES};
use ring_matvec::matrix::{DEFAULT_HIGHEST_VALUE, DEFAULT_LOWEST_VALUE, DEFAULT_MATRIX_SIZE};
use ring_matvec::pipeline::{run_rank, PipelineOptions};
use ring_matvec::report::{header, Reporter};
use ring_matvec::stripe::RemainderPolicy;

#[derive(Parser, Debug)]
#[command(name = "ring-matvec")]
#[command(about = "Multiply a square matrix by a column vector along a chain of processes")]
#[command(version)]
struct Cli {
    /// Matrix file: one row per line, values separated by spaces. Generated when omitted.
    matrix: Option<PathBuf>,

    /// Number of processes in the chain.
    #[arg(short = 'n', long, env = "RING_MATVEC_PROCESSES", default_value_t = DEFAULT_PROCESSES)]
    processes: usize,

    /// Read the column vector from this file instead of generating it.
    #[arg(long)]
    vector: Option<PathBuf>,

    /// Size of the generated matrix.
    #[arg(long, default_value_t = DEFAULT_MATRIX_SIZE, conflicts_with = "matrix")]
    size: usize,

    /// Smallest generated value.
    #[arg(long, default_value_t = DEFAULT_LOWEST_VALUE, allow_negative_numbers = true)]
    min: i32,

    /// Generated values stay strictly below this one.
    #[arg(long, default_value_t = DEFAULT_HIGHEST_VALUE, allow_negative_numbers = true)]
    max: i32,

    /// Seed for generated values.
    #[arg(long)]
    seed: Option<u64>,

    /// How rows left over by an uneven split are handled.
    #[arg(long, value_enum, default_value_t = RemainderPolicy::AssignToLast)]
    remainder: RemainderPolicy,

    /// Leave the complete result on the last process instead of returning it to process 0.
    #[arg(long)]
    no_gather: bool,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        RunConfig {
            processes: self.processes,
            matrix: match self.matrix {
                Some(path) => MatrixSource::File(path),
                None => MatrixSource::Random { size: self.size },
            },
            vector_file: self.vector,
            lower: self.min,
            upper: self.max,
            seed: self.seed,
            options: PipelineOptions {
                policy: self.remainder,
                gather: !self.no_gather,
            },
        }
    }
}

fn run(config: RunConfig) -> anyhow::Result<()> {
    // Input problems surface here, before any other process exists
    let input = if World::is_spawned() {
        None
    } else {
        Some(config.load_input().context("Failed to load input")?)
    };

    let world = World::init(config.processes as i32)
        .context("Failed to start the process group")?;
    let rank = world.rank();
    let mut reporter = Reporter::stdout(rank as usize);

    match run_rank(&world, input, &config.options, &mut reporter) {
        Ok(outcome) => {
            debug!(
                "Rank {} done with rows {}..{}",
                rank, outcome.stripe.start, outcome.stripe.end
            );
            world.finalize().context("Failed to shut down cleanly")?;
            Ok(())
        }
        Err(e) => {
            world.abort();
            Err(e).with_context(|| format!("{}pipeline failed", header(rank as usize)))
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli.into_config()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

//! Command-line frontend: read a BA-format automaton, complement it, and
//! report the construction sizes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use buchi_compl::buchi::parse::{parse_ba, write_ba};
use buchi_compl::complement::{complement, ComplementError, Options, SimulationRelations};

/// Generated macrostates beyond this limit are treated as resource
/// exhaustion.
const STATE_LIMIT: usize = 2_000_000;

#[derive(Parser)]
#[command(
    name = "buchi-compl",
    version,
    about = "Complement a nondeterministic Büchi automaton"
)]
struct Args {
    /// Input automaton in the BA format.
    input: PathBuf,
    /// Also write the complement to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    run(&Args::parse())
}

fn run(args: &Args) -> ExitCode {
    let text = match std::fs::read_to_string(&args.input) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read {}: {}", args.input.display(), err);
            return ExitCode::from(1);
        }
    };
    let raw = match parse_ba(&text) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
    };
    let (aut, names) = match raw.into_dense() {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
    };

    let sims = SimulationRelations::identity(aut.num_states());
    let opts = Options {
        max_states: Some(STATE_LIMIT),
        ..Options::default()
    };
    let result = match complement(&aut, &sims, &opts) {
        Ok(result) => result,
        Err(err @ ComplementError::CapacityExceeded { .. }) => {
            eprintln!("{}", err);
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
    };

    println!("Generated states: {}", result.stats.generated_states);
    println!("Generated trans: {}", result.stats.generated_transitions);
    println!("States: {}", result.stats.final_states);
    println!("Transitions: {}", result.stats.final_transitions);

    if let Some(path) = &args.output {
        let printed = write_ba(&result.automaton, &names.symbols);
        if let Err(err) = std::fs::write(path, printed) {
            eprintln!("cannot write {}: {}", path.display(), err);
            return ExitCode::from(1);
        }
    }

    println!("Time: {:.2}", result.stats.total.as_secs_f64());
    ExitCode::SUCCESS
}

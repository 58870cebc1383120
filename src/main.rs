use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs;
use std::path::PathBuf;
use tunebox::{OptimizationRequest, OptimizationSolver, METHODS};

/// Constrained multi-objective parameter tuning
#[derive(Parser, Debug)]
#[command(name = "tunebox", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solves an optimization request given as a JSON file
    Solve {
        /// JSON request file
        request: PathBuf,
        /// Writes the JSON response to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overrides the method of the request
        #[arg(short, long)]
        method: Option<String>,
        /// Overrides the random seed of the request
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Lists the available optimization methods
    Methods,
}

fn solve(
    request: PathBuf,
    output: Option<PathBuf>,
    method: Option<String>,
    seed: Option<u64>,
) -> Result<()> {
    let content = fs::read_to_string(&request)
        .with_context(|| format!("cannot read request {}", request.display()))?;
    let mut request: OptimizationRequest =
        serde_json::from_str(&content).context("invalid optimization request")?;
    if let Some(method) = method {
        request.method = method;
    }
    if let Some(seed) = seed {
        request = request.configure(|c| c.seed(seed));
    }

    // interrupted runs still report their best point
    let solver = OptimizationSolver::new().interruptible(true);
    let response = solver.optimize_system(&request)?;
    let json = serde_json::to_string_pretty(&response)?;
    match output {
        Some(path) => {
            fs::write(&path, json)
                .with_context(|| format!("cannot write response {}", path.display()))?;
            info!("Response written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Solve {
            request,
            output,
            method,
            seed,
        } => solve(request, output, method, seed),
        Command::Methods => {
            for entry in METHODS.iter() {
                let aliases = if entry.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" (aliases: {})", entry.aliases.join(", "))
                };
                println!("{:<24}{}{aliases}", entry.name, entry.description);
            }
            Ok(())
        }
    }
}

//! SSA Lifter CLI

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::Level;

use ssalift::trace::{self, TraceFormat};
use ssalift::{DecodedFunction, LiftConfig, Lifter};

#[derive(Parser)]
#[command(name = "ssalift", version, about = "Lift decoded machine code to SSA form")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lift a decoded function and print its IR
    Lift {
        /// Trace file (.toml, otherwise JSON)
        trace: PathBuf,
        /// Print the IR as JSON
        #[arg(long)]
        json: bool,
        /// Do not emit a nop before each instruction
        #[arg(long)]
        no_separators: bool,
        /// Fail on blocks whose exit cannot be resolved
        #[arg(long)]
        reject_unresolved: bool,
        /// Log every block and instruction
        #[arg(short, long)]
        verbose: bool,
    },
    /// Lift a decoded function and print a summary
    Check {
        /// Trace file (.toml, otherwise JSON)
        trace: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Command::Lift { verbose: true, .. });
    tracing_subscriber::fmt()
        .with_max_level(if verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let result = match cli.command {
        Command::Lift {
            trace,
            json,
            no_separators,
            reject_unresolved,
            ..
        } => {
            let config = LiftConfig::default()
                .emit_separators(!no_separators)
                .reject_unresolved(reject_unresolved);
            lift_file(&trace, &config, json)
        }
        Command::Check { trace } => check_file(&trace),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load(path: &Path) -> Result<DecodedFunction, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();

    match DecodedFunction::parse(&source, TraceFormat::from_path(path)) {
        Ok(func) => Ok(func),
        Err(e) => {
            trace::report_error(&filename, &source, &e)?;
            Err(e.into())
        }
    }
}

fn lift_file(path: &Path, config: &LiftConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let func = load(path)?;
    let lifted = Lifter::new(config.clone()).lift(&func)?;

    if json {
        println!("{}", serde_json::to_string_pretty(lifted.ir())?);
    } else {
        print!("{}", lifted.format());
    }
    Ok(())
}

fn check_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let func = load(path)?;
    let lifted = Lifter::default().lift(&func)?;

    let phis: usize = lifted.blocks().iter().map(|b| b.phis().len()).sum();
    println!(
        "✓ {}: {} blocks, {} instructions, {} values, {} phis",
        func.name,
        lifted.blocks().len(),
        func.instr_count(),
        lifted.ir().value_count(),
        phis
    );
    for &id in lifted.unresolved() {
        println!("  unresolved exit in block {:#x}", lifted.block(id).address());
    }
    Ok(())
}

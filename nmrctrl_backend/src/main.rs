//! # nmrctrl
//!
//! Command-line front end for the tabletop NMR backend.
//!
//! ```bash
//! # Prepare and start the pulse program (steps 0-4)
//! nmrctrl --config nmr.toml run
//!
//! # Full sequence including acquisition and spectrum
//! nmrctrl --config nmr.toml run --all
//!
//! # Inspect a pulse program
//! nmrctrl parse pulse_program.txt
//! ```
//!
//! Ctrl-C cancels a pending step delay or a running acquisition; collected samples are kept.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use env_logger::Env;

use nmrctrl_backend::*;
use pulseprog_backend::PulseFile;

#[derive(Parser)]
#[command(name = "nmrctrl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for debug, -vv for trace); overrides the configured level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the experiment on the configured device
    Run {
        /// Also acquire and visualize instead of stopping after the start step
        #[arg(long)]
        all: bool,
    },

    /// List the experiment steps in execution order
    StepList,

    /// Print the parameters of a pulse program
    Parse {
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,
    },
}

fn init_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
}

fn run(config: ExperimentConfig, all: bool) -> Result<bool> {
    let toolchain = Box::new(ExternalToolchain::new(&config.toolchain));
    let connector = Box::new(SerialConnector::new(&config.serial));
    let ctrl = Controller::spawn(config, toolchain, connector)?;

    let stop = ctrl.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("Received interrupt, stopping");
        stop.stop();
    })
    .map_err(|e| Error::Worker(format!("cannot install Ctrl-C handler: {}", e)))?;

    if all {
        ctrl.request_run_all();
    } else {
        ctrl.request_run();
    }

    let mut halted = false;
    let mut samples = 0;
    for event in ctrl.events().iter() {
        match event {
            Event::Status(msg) => println!("{}", msg),
            Event::SamplesReady(frame) => {
                samples += frame.len();
                log::debug!("{} samples so far", samples);
            }
            Event::Plots(result) => {
                for plot in &result.plots {
                    println!("{}: {} points", plot.title, plot.x.len());
                }
            }
            Event::Halted(msg) => {
                eprintln!("{}", msg);
                halted = true;
            }
            Event::Idle => break,
        }
    }
    ctrl.close()?;
    Ok(!halted)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Run { all } => {
            if run(config, all)? {
                return Ok(ExitCode::SUCCESS);
            }
            Ok(ExitCode::FAILURE)
        }
        Commands::StepList => {
            for (i, name) in STEP_NAMES.iter().enumerate() {
                println!("{}: {}", i, name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Parse { program } => {
            let file = PulseFile::load(&program)?;
            println!("{}", file.params());
            Ok(ExitCode::SUCCESS)
        }
    }
}

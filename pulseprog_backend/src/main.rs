use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use pulseprog_backend::*;

/// Prints the tunable values of a pulse program, optionally writing an edited copy.
#[derive(Parser)]
#[command(name = "pulseprog_backend_bin", version, about)]
struct Cli {
    /// Pulse program to read
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,

    /// Parameter overrides as key=value (e.g. -s echo_delay=1.5)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Where to write the edited program
    #[arg(short, long, default_value = DEFAULT_PROGRAM_FILE)]
    output: PathBuf,

    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let mut file = PulseFile::load(&cli.program)?;
    println!("{}", file.params());

    if cli.overrides.is_empty() {
        return Ok(());
    }
    for item in &cli.overrides {
        match item.split_once('=') {
            Some((key, value)) => file.set_param(key.trim(), ParamValue::parse(value))?,
            None => eprintln!("Ignoring override '{}': expected KEY=VALUE", item),
        }
    }
    file.save_as(&cli.output)?;
    println!("Edited program written to {}", cli.output.display());
    Ok(())
}

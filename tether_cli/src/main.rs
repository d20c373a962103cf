use tether_core::config::TetherConfig;
use tether_core::session::{Session, SessionConfig};
use tether_core::source::RngSource;

use clap::Parser;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Generator binary, overriding the configured one.
    #[clap(long)]
    generator: Option<PathBuf>,
    /// Seed for the deterministic bit source.
    #[clap(short, long, default_value_t = 0)]
    seed: u64,
    /// Write the generated program here instead of stdout.
    #[clap(short, long)]
    out: Option<PathBuf>,
    /// Persist the drawn byte buffer for later replay tooling.
    #[clap(long)]
    record: Option<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let config = match cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}",);
            Some(TetherConfig::load_from_file(&config_path)?)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}",
                );
                Some(TetherConfig::load_from_file(&default_config_path)?)
            } else {
                println!(
                    "No config file specified and default 'config.toml' not found, relying on --generator."
                );
                None
            }
        }
    };

    let mut session_config = match config {
        Some(config) => config.generator.to_session_config(),
        None => {
            let binary = cli.generator.clone().ok_or_else(|| {
                anyhow::anyhow!("No generator binary: pass --generator or provide a config file")
            })?;
            SessionConfig {
                binary,
                args: Vec::new(),
                shutdown_timeout: Duration::from_secs(1),
            }
        }
    };
    if let Some(generator) = cli.generator {
        session_config.binary = generator;
    }

    println!(
        "Generating with {:?} (seed {})...",
        session_config.binary, cli.seed
    );

    let mut source = RngSource::new(ChaCha8Rng::seed_from_u64(cli.seed));
    let session = Session::new(session_config)?;
    let program = session.generate(&mut source)?;

    if let Some(record_path) = &cli.record {
        std::fs::write(record_path, source.buffer())?;
        println!(
            "Recorded {} drawn bytes to {record_path:?}",
            source.buffer().len()
        );
    }

    match &cli.out {
        Some(out_path) => {
            std::fs::write(out_path, &program)?;
            println!("Wrote {} bytes to {out_path:?}", program.len());
        }
        None => print!("{program}"),
    }

    Ok(())
}

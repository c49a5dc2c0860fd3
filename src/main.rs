//! COPSS router daemon
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port, run ./Command.txt if present, then read
//! # console commands from stdin
//! copssd
//!
//! # Using a configuration file
//! copssd --config copssd.toml
//!
//! # Write an example configuration
//! copssd gen-config --output copssd.toml
//! ```

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use copss::{
    command::{self, Outcome},
    config::RouterConfig,
    router::Router,
    substrate::LocalSubstrate,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SCRIPT: &str = "Command.txt";

/// COPSS content-oriented publish/subscribe router
#[derive(Parser, Debug)]
#[command(name = "copssd")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on (overrides the configuration)
    #[arg(short = 'p', long)]
    listen_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Console commands to run at startup [default: Command.txt if present]
    #[arg(short, long)]
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "copssd.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let mut config = match args.config {
        Some(ref path) => RouterConfig::from_file(path)?,
        None => RouterConfig::default(),
    };
    if let Some(port) = args.listen_port {
        config.router.listen_port = port;
    }

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.router.log_level.clone());
    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut router = Router::start(&config, Arc::new(LocalSubstrate::new()))?;
    router.provision(&config)?;

    let mut out = io::stdout();

    let script = match args.script {
        Some(path) => Some(path),
        None => Some(PathBuf::from(DEFAULT_SCRIPT)).filter(|path| path.exists()),
    };
    let mut outcome = Outcome::Continue;
    if let Some(path) = script {
        outcome = run_script(&router, &path, &mut out)?;
    }

    if outcome == Outcome::Continue {
        write!(out, "{}", router.status())?;
        writeln!(out, "{}", command::HELP)?;
        writeln!(out, "COPSSD started, you can type commands now.")?;
        out.flush()?;

        for line in io::stdin().lock().lines() {
            let line = line?;
            if command::handle_line(&router, &line, &mut out)? == Outcome::Stop {
                break;
            }
            out.flush()?;
        }
    }

    router.stop();
    router.join();
    Ok(())
}

fn run_script<W: Write>(
    router: &Router<LocalSubstrate>,
    path: &Path,
    out: &mut W,
) -> io::Result<Outcome> {
    info!(script = %path.display(), "Running startup script");
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        writeln!(out, "{line}")?;
        if command::handle_line(router, &line, out)? == Outcome::Stop {
            warn!("Startup script stopped the router");
            return Ok(Outcome::Stop);
        }
    }
    Ok(Outcome::Continue)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = RouterConfig::example().to_toml_string()?;

    let content = format!(
        r#"# COPSS Router Configuration
# Generated by copssd gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match RouterConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Listen: {}", config.listen_addr()?);
            println!("RP mappings:");
            for (prefix, rp) in config.rp_mapping_table()?.mappings() {
                println!("  {prefix} -> {rp}");
            }
            println!("Links: {}", config.links.len());
            for (addr, is_router) in config.links()? {
                println!(
                    "  {} {}",
                    addr,
                    if is_router { "(router)" } else { "" }
                );
            }
            println!("FIB entries: {}", config.fibs.len());
            println!("RPs: {}", config.rps.join(", "));
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

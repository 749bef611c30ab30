//! Command-line front end: expand pipeline specification templates.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use irpipe::template;

#[derive(Parser, Debug)]
#[command(name = "irpipe", version)]
#[command(about = "Expand IR evaluation pipeline specification templates")]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand a template and print the resulting specification
    Template {
        /// Template file, or `-` for standard input
        spec: String,

        /// Positional arguments bound by `template NAME $N` directives
        args: Vec<String>,

        /// Print the expanded text without parsing it
        #[arg(long)]
        raw: bool,
    },
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn expand(spec: &str, args: &[String]) -> Result<String> {
    if spec == "-" {
        debug!(args = args.len(), "expanding template from stdin");
        template::preprocess_reader(io::stdin().lock(), args).context("Failed to expand template from stdin")
    } else {
        debug!(path = spec, args = args.len(), "expanding template");
        template::preprocess_file(Path::new(spec), args)
            .with_context(|| format!("Failed to expand template {spec}"))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Command::Template { spec, args, raw } => {
            let text = expand(&spec, &args)?;
            let mut stdout = io::stdout().lock();
            if raw {
                stdout.write_all(text.as_bytes())?;
            } else {
                let parsed = template::parse_specification(&text).context("Failed to parse specification")?;
                serde_json::to_writer_pretty(&mut stdout, &parsed)?;
                writeln!(stdout)?;
            }
        }
    }
    Ok(())
}

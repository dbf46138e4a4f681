use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use manuscript_review::cli;
use manuscript_review::logging::{init_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "manuscript")]
#[command(about = "Review scanned manuscript pages: transcripts, entity caches and box annotations")]
struct Cli {
    /// Config file (defaults to ./manuscript.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show transcript and cache state of every page
    Status {
        folder: PathBuf,
    },

    /// Transcribe pages with an external program
    Batch {
        folder: PathBuf,

        /// Transcriber program; reads the image on stdin, prints text
        #[arg(long)]
        command: Option<String>,

        /// Argument passed to the transcriber (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Include pages that already have a transcript
        #[arg(long)]
        all: bool,

        /// Transcribe only the named page (repeatable)
        #[arg(long = "page")]
        pages: Vec<String>,
    },

    /// Print the digest of a transcript file
    Digest {
        file: PathBuf,
    },

    /// Drop cached entities and boxes of a page
    Clear {
        folder: PathBuf,
        page: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging_config = LoggingConfig {
        level: cli.log_level.clone(),
        enable_file_logging: cli.log_dir.is_some(),
        log_dir: cli.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs")),
        ..LoggingConfig::default()
    };
    let _guard = init_logging(&logging_config)?;

    let config = cli::load_config(cli.config)?;

    match cli.command {
        Commands::Status { folder } => cli::status_command(&folder),
        Commands::Batch {
            folder,
            command,
            args,
            all,
            pages,
        } => {
            let command_line: Vec<String> = command
                .map(|program| std::iter::once(program).chain(args).collect())
                .unwrap_or_default();
            cli::batch_command(&folder, command_line, all, pages, &config)
        }
        Commands::Digest { file } => cli::digest_command(&file),
        Commands::Clear { folder, page } => cli::clear_command(&folder, &page),
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use dlm_core::config;
use dlm_core::persist::Database;

mod commands;
mod protocol;

/// Top-level CLI for the dlm download manager.
#[derive(Debug, Parser)]
#[command(name = "dlm")]
#[command(about = "dlm: multi-connection download manager", long_about = None)]
pub struct Cli {
    /// Install the downloadmanager:// URL-scheme handler and exit.
    #[arg(long, exclusive = true)]
    pub register_protocol: bool,

    /// Remove the downloadmanager:// URL-scheme handler and exit.
    #[arg(long, exclusive = true)]
    pub unregister_protocol: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Local filename (defaults to the server/URL suggestion).
        #[arg(long)]
        filename: Option<String>,

        /// Destination directory (defaults to the configured download dir).
        #[arg(long)]
        dest: Option<String>,

        /// Queue priority; higher values start earlier.
        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Delay the download by this many seconds.
        #[arg(long = "in", value_name = "SECONDS")]
        delay: Option<u64>,

        /// Expected checksum of the final file (hex).
        #[arg(long)]
        checksum: Option<String>,
    },

    /// Run the queue: download everything pending until the queue drains.
    Run {
        /// Optionally add this URL before running.
        url: Option<String>,
    },

    /// List all downloads.
    List,

    /// Show one download in detail.
    Status {
        /// Task identifier.
        id: String,
    },

    /// Show aggregate statistics.
    Stats,

    /// Pause a download.
    Pause { id: String },

    /// Resume a paused download (takes effect on the next run).
    Resume { id: String },

    /// Cancel a download.
    Cancel { id: String },

    /// Retry an errored download.
    Retry { id: String },

    /// Remove a download and its record.
    Remove { id: String },
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        if cli.register_protocol {
            return protocol::register();
        }
        if cli.unregister_protocol {
            return protocol::unregister();
        }

        let settings = config::load_or_init()?;
        let db = Database::open_default().await?;

        match cli.command {
            Some(CliCommand::Add {
                url,
                filename,
                dest,
                priority,
                delay,
                checksum,
            }) => commands::add::run(&db, &settings, url, filename, dest, priority, delay, checksum).await,
            Some(CliCommand::Run { url }) => commands::run::run(db, settings, url).await,
            Some(CliCommand::List) => commands::list::run(&db).await,
            Some(CliCommand::Status { id }) => commands::status::run(&db, &id).await,
            Some(CliCommand::Stats) => commands::stats::run(&db).await,
            Some(CliCommand::Pause { id }) => commands::pause::run(&db, &id).await,
            Some(CliCommand::Resume { id }) => commands::resume::run(&db, &id).await,
            Some(CliCommand::Cancel { id }) => commands::cancel::run(&db, &id).await,
            Some(CliCommand::Retry { id }) => commands::retry::run(&db, &id).await,
            Some(CliCommand::Remove { id }) => commands::remove::run(&db, &id).await,
            None => commands::run::run(db, settings, None).await,
        }
    }
}

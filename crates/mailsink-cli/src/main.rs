//! Mailsink CLI - status queries and sample data

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailsink_cli::generate::{generate_mails, GenerateOptions};
use mailsink_worker::config;
use mailsink_worker::status::{StatusConn, StatusStore};

#[derive(Parser, Debug)]
#[command(name = "mailsink")]
#[command(author, version, about = "Mailsink operator CLI")]
struct Cli {
    /// Path to the worker's YAML config file (required for status queries)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show domain-level success/failure/pending counts
    DomainStats { domain: String },

    /// Show user-level success/failure/pending counts
    UserStats { user_id: String },

    /// Show the received time of the most recently completed mail
    Progress,

    /// Generate sample mail JSON files
    Generate {
        /// Output directory (e.g. the waiting directory)
        out: PathBuf,

        /// How many mails to generate
        #[arg(long, default_value_t = 200)]
        count: u32,

        /// How many domains to cycle
        #[arg(long, default_value_t = 4)]
        domains: u32,

        /// Start timestamp (ISO). Default: now minus one day
        #[arg(long)]
        start: Option<String>,

        /// Mailbox value
        #[arg(long, default_value = "inbox")]
        mailbox: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::DomainStats { domain } => {
            let mut conn = open_status(cli.config.as_deref()).await?;
            let stats = conn.domain_stats(&domain).await?;
            println!("{}", serde_json::to_string(&stats)?);
            conn.close().await;
        },
        Command::UserStats { user_id } => {
            let mut conn = open_status(cli.config.as_deref()).await?;
            let stats = conn.user_stats(&user_id).await?;
            println!("{}", serde_json::to_string(&stats)?);
            conn.close().await;
        },
        Command::Progress => {
            let mut conn = open_status(cli.config.as_deref()).await?;
            let last = conn.last_completed_time().await?;
            println!(
                "{}",
                serde_json::to_string(&serde_json::json!({ "last_completed_time": last }))?
            );
            conn.close().await;
        },
        Command::Generate {
            out,
            count,
            domains,
            start,
            mailbox,
        } => {
            let options = GenerateOptions {
                count,
                domains,
                start,
                mailbox,
            };
            let written = generate_mails(&out, &options)?;
            println!("Generated {written} mails in {}", out.display());
        },
    }

    Ok(())
}

async fn open_status(config: Option<&std::path::Path>) -> Result<StatusConn> {
    let path = config.context("--config is required for status queries")?;
    let cfg = config::load_config(path)?;
    let store = StatusStore::new(&cfg.paths.sqlite_path);
    store.ensure_schema().await?;
    let conn = store.connect().await?;
    Ok(conn)
}

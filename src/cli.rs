use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::AssistantConfig;
use crate::email::{EmailMessage, PresetClassifier, SnapshotMailbox};
use crate::events::{AssistantEvent, EventBridge};
use crate::performance::AsyncEmailProcessor;

/// Mail Assistant - background mail processing from the command line
#[derive(Parser)]
#[command(name = "mail-assistant")]
#[command(about = "Fetch, classify and batch-process mail on a background worker pool")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show or create the configuration file
    Config(ConfigArgs),

    /// Fetch a folder through the worker pool and result cache
    Fetch(FetchArgs),

    /// Fetch a folder and classify its messages
    Classify(MailboxArgs),

    /// Fetch a folder and tag every message in one batch
    Batch(BatchArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
pub struct MailboxArgs {
    /// JSON mailbox snapshot (folder name -> messages)
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Folder to read (defaults to fetch.default_folder)
    #[arg(long)]
    pub folder: Option<String>,

    /// Search criteria (defaults to fetch.default_criteria)
    #[arg(long)]
    pub criteria: Option<String>,
}

#[derive(Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub mailbox: MailboxArgs,

    /// Number of fetches; every fetch after the first is served from cache
    #[arg(long, default_value_t = 2)]
    pub repeat: usize,
}

#[derive(Args)]
pub struct BatchArgs {
    #[command(flatten)]
    pub mailbox: MailboxArgs,

    /// Category applied to every message
    #[arg(long)]
    pub category: Option<String>,
}

/// Run the parsed command
pub async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => AssistantConfig::default_path()?,
    };

    match cli.command {
        Commands::Config(args) => handle_config(args, &config_path),
        Commands::Fetch(args) => {
            let config = AssistantConfig::load_or_default(&config_path)?;
            handle_fetch(args, &config).await
        }
        Commands::Classify(args) => {
            let config = AssistantConfig::load_or_default(&config_path)?;
            handle_classify(args, &config).await
        }
        Commands::Batch(args) => {
            let config = AssistantConfig::load_or_default(&config_path)?;
            handle_batch(args, &config).await
        }
    }
}

fn handle_config(args: ConfigArgs, path: &Path) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = AssistantConfig::load_or_default(path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            AssistantConfig::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

/// Processor over a snapshot, plus the bridge its callbacks report through
struct Session {
    processor: AsyncEmailProcessor,
    bridge: EventBridge,
    events: UnboundedReceiver<AssistantEvent>,
    folder: String,
    criteria: String,
}

impl Session {
    fn open(args: &MailboxArgs, config: &AssistantConfig) -> Result<Self> {
        let mailbox = SnapshotMailbox::load(&args.snapshot)
            .with_context(|| format!("Failed to open snapshot {}", args.snapshot.display()))?;
        let processor = AsyncEmailProcessor::new(
            config,
            Arc::new(mailbox),
            Arc::new(PresetClassifier::default()),
        )?;
        let (bridge, events) = EventBridge::new();

        Ok(Self {
            processor,
            bridge,
            events,
            folder: args
                .folder
                .clone()
                .unwrap_or_else(|| config.fetch.default_folder.clone()),
            criteria: args
                .criteria
                .clone()
                .unwrap_or_else(|| config.fetch.default_criteria.clone()),
        })
    }

    async fn next_event(&mut self) -> Result<AssistantEvent> {
        match self.events.recv().await {
            Some(AssistantEvent::OperationFailed { operation, error }) => {
                Err(anyhow!("{} failed: {}", operation, error))
            }
            Some(event) => Ok(event),
            None => Err(anyhow!("Event channel closed unexpectedly")),
        }
    }

    /// Fetch through the processor; returns the messages and whether they came from cache
    async fn fetch(&mut self) -> Result<(Vec<EmailMessage>, bool)> {
        let handle = self.processor.fetch_emails_async(
            &self.folder,
            &self.criteria,
            self.bridge.on_fetched(),
            self.bridge.on_failure("fetch"),
        );
        let from_cache = handle.is_none();

        loop {
            if let AssistantEvent::EmailsFetched(messages) = self.next_event().await? {
                return Ok((messages, from_cache));
            }
        }
    }

    /// Stop the worker pool without blocking the runtime
    async fn close(self) -> Result<()> {
        let processor = self.processor;
        tokio::task::spawn_blocking(move || processor.close()).await?;
        Ok(())
    }
}

fn print_messages(messages: &[EmailMessage]) {
    for message in messages {
        println!(
            "  [{}] {} | {} | {}",
            message.id,
            message.date.format("%Y-%m-%d %H:%M"),
            message.sender,
            message.subject
        );
    }
}

async fn handle_fetch(args: FetchArgs, config: &AssistantConfig) -> Result<()> {
    let mut session = Session::open(&args.mailbox, config)?;

    for run in 1..=args.repeat.max(1) {
        let (messages, from_cache) = session.fetch().await?;
        println!(
            "Fetch {}: {} messages from {}/{} ({})",
            run,
            messages.len(),
            session.folder,
            session.criteria,
            if from_cache { "cache" } else { "mailbox" }
        );
        if run == 1 {
            print_messages(&messages);
        }
    }

    let stats = session.processor.cache().stats();
    println!(
        "Cache: {} hits, {} misses ({:.0}% hit rate)",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );
    session.close().await
}

async fn handle_classify(args: MailboxArgs, config: &AssistantConfig) -> Result<()> {
    let mut session = Session::open(&args, config)?;
    let (messages, _) = session.fetch().await?;

    session.processor.classify_emails_async(
        messages,
        session.bridge.on_classified(),
        session.bridge.on_failure("classify"),
    );

    loop {
        if let AssistantEvent::EmailsClassified(classified) = session.next_event().await? {
            for message in &classified {
                println!(
                    "  [{}] {:<12} {}",
                    message.id,
                    message.category.as_deref().unwrap_or("-"),
                    message.subject
                );
            }
            break;
        }
    }
    session.close().await
}

async fn handle_batch(args: BatchArgs, config: &AssistantConfig) -> Result<()> {
    let mut session = Session::open(&args.mailbox, config)?;
    let (messages, _) = session.fetch().await?;
    let total = messages.len();

    session.processor.batch_process_async(
        messages,
        args.category.clone(),
        None,
        session.bridge.on_batch(),
        session.bridge.on_failure("batch"),
        session.bridge.on_progress(),
    );

    loop {
        match session.next_event().await? {
            AssistantEvent::Progress { task_id, percent } => {
                tracing::debug!("{} at {}%", task_id, percent);
            }
            AssistantEvent::BatchCompleted(outcome) => {
                println!(
                    "Processed {}/{} messages ({} failed), category: {}",
                    outcome.processed.len(),
                    total,
                    outcome.failed,
                    args.category.as_deref().unwrap_or("unchanged")
                );
                break;
            }
            _ => {}
        }
    }
    session.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch_command() {
        let cli = Cli::try_parse_from([
            "mail-assistant",
            "--debug",
            "fetch",
            "--snapshot",
            "mail.json",
            "--folder",
            "Sent",
            "--repeat",
            "3",
        ])
        .unwrap();

        assert!(cli.debug);
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.mailbox.snapshot, PathBuf::from("mail.json"));
                assert_eq!(args.mailbox.folder.as_deref(), Some("Sent"));
                assert!(args.mailbox.criteria.is_none());
                assert_eq!(args.repeat, 3);
            }
            _ => panic!("expected fetch command"),
        }
    }

    #[test]
    fn test_parse_config_init() {
        let cli = Cli::try_parse_from(["mail-assistant", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs {
                action: ConfigAction::Init { force: true }
            })
        ));
    }

    #[test]
    fn test_snapshot_is_required() {
        assert!(Cli::try_parse_from(["mail-assistant", "batch"]).is_err());
    }
}

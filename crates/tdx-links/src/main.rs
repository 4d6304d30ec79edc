use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tdx_links::{
    load_configuration, poll_for_changes, replace_item_ids, AutoRewriter, Document,
    DocumentRegistry, FileDocument, FileWatch, RewriteSession,
};
use tdx_links_core::{find_replacements, Configuration};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tdx-links")]
#[command(about = "Turn ticket keywords in markdown notes into TeamDynamix links", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file: TOML, or the Obsidian plugin's data.json
    #[arg(short, long, global = true, env = "TDX_LINKS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link every item ID in the given files once
    Rewrite {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the planned links instead of writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Keep a file linked as it is edited, until Ctrl-C
    Watch {
        file: PathBuf,

        /// How often to look for changes, in milliseconds
        #[arg(long, default_value_t = 4000)]
        poll_ms: u64,
    },

    /// Validate the settings file
    CheckConfig,

    /// Print the default settings as TOML
    PrintDefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Rewrite { files, dry_run } => rewrite(cli.config.as_deref(), &files, dry_run).await,
        Commands::Watch { file, poll_ms } => {
            watch(cli.config, file, Duration::from_millis(poll_ms)).await
        }
        Commands::CheckConfig => check_config(cli.config.as_deref()),
        Commands::PrintDefaultConfig => {
            print!("{}", Configuration::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn rewrite(config_path: Option<&Path>, files: &[PathBuf], dry_run: bool) -> Result<()> {
    let session = RewriteSession::new(load_configuration(config_path)?);
    let mut failed = 0;

    for path in files {
        let doc = FileDocument::new(path);
        let result = if dry_run {
            show_plan(&session, &doc).await
        } else {
            replace_item_ids(&session, &doc).await.map(|count| {
                println!("{}: {} link(s)", doc.key().bold(), count);
            })
        };
        if let Err(e) = result {
            eprintln!("{} {}: {:#}", "error:".red().bold(), doc.key(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, files.len());
    }
    Ok(())
}

async fn show_plan(session: &RewriteSession, doc: &FileDocument) -> Result<()> {
    let text = doc.text().await?;
    let mut replacements = find_replacements(&text, &session.configuration());
    replacements.reverse();

    if replacements.is_empty() {
        println!("{}: {}", doc.key().bold(), "nothing to link".dimmed());
    }
    for r in &replacements {
        let line = text[..r.start].matches('\n').count() + 1;
        println!(
            "{}:{}: {} -> {}",
            doc.key().bold(),
            line,
            &text[r.range()],
            r.text.green()
        );
    }
    Ok(())
}

async fn watch(config_path: Option<PathBuf>, file: PathBuf, poll: Duration) -> Result<()> {
    let config = load_configuration(config_path.as_deref())?;
    if !config.auto_replace_enabled {
        bail!("Automatic replacement is disabled in settings; use `tdx-links rewrite` instead");
    }

    let session = Arc::new(RewriteSession::new(config));
    let (rewriter, rx) = AutoRewriter::new();
    let rewriter = Arc::new(rewriter);

    let doc: Arc<dyn Document> = Arc::new(FileDocument::new(&file));
    let key = doc.key().to_string();
    let docs: Arc<DocumentRegistry> = Arc::new(DashMap::new());
    docs.insert(key.clone(), doc);

    let worker = tokio::spawn(Arc::clone(&rewriter).run_worker(rx, docs, Arc::clone(&session)));
    let poller = tokio::spawn(poll_for_changes(
        FileWatch::new(&file),
        key.clone(),
        Arc::clone(&rewriter),
        poll,
    ));
    let settings = config_path.map(|path| tokio::spawn(watch_settings(path, Arc::clone(&session), poll)));

    tracing::info!("Watching {} (Ctrl-C to stop)", key);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    poller.abort();
    worker.abort();
    if let Some(settings) = settings {
        settings.abort();
    }
    Ok(())
}

/// Reload settings whenever the settings file changes.
async fn watch_settings(path: PathBuf, session: Arc<RewriteSession>, poll: Duration) {
    let mut watch = FileWatch::new(&path);
    // the file was just loaded
    let _ = watch.check();

    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        match watch.check() {
            Ok(true) => match load_configuration(Some(&path)) {
                Ok(config) => session.reload_configuration(config),
                Err(e) => tracing::warn!("Keeping previous settings: {:#}", e),
            },
            Ok(false) => {}
            Err(e) => tracing::warn!("{:#}", e),
        }
    }
}

fn check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_configuration(config_path)?;
    let issues = config.validate();

    if issues.is_empty() {
        println!(
            "{} {} keyword rule(s), {} path template(s)",
            "ok:".green().bold(),
            config.rules.len(),
            config.templates.len()
        );
        return Ok(());
    }

    for issue in &issues {
        println!("{} {}", "warning:".yellow().bold(), issue);
    }
    bail!("{} settings issue(s) found", issues.len())
}

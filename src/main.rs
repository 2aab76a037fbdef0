use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};

use mail_labeler::config::AppConfig;
use mail_labeler::error::{Error, Result};
use mail_labeler::mail::{Authenticator, ClientSecrets, GmailClient, MailSource, Session};
use mail_labeler::pipeline::{Labeler, PassSummary};
use mail_labeler::rules::import::import_file;
use mail_labeler::rules::routes::rule_routes;
use mail_labeler::rules::{KeywordMapping, RuleStore, load_mapping};
use mail_labeler::store::{Database, LibSqlBackend};

const USAGE: &str = "usage: mail-labeler [label | serve | import <file.json>]";

enum Command {
    Label,
    Serve,
    Import(String),
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    match args.first().map(String::as_str) {
        None | Some("label") => Ok(Command::Label),
        Some("serve") => Ok(Command::Serve),
        Some("import") => match args.get(1) {
            Some(path) => Ok(Command::Import(path.clone())),
            None => bail!("import needs a file path\n{USAGE}"),
        },
        Some(other) => bail!("unknown command `{other}`\n{USAGE}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;
    let config = AppConfig::from_env().context("invalid configuration")?;

    eprintln!("📬 Mail Labeler v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());

    let store = open_store(&config)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;

    match command {
        Command::Serve => serve(&config, store).await,
        Command::Import(path) => {
            let summary = import_file(&store, Path::new(&path))
                .await
                .with_context(|| format!("failed to import {path}"))?;
            eprintln!(
                "   Imported {}: {} created, {} merged, {} failed",
                path, summary.created, summary.merged, summary.failed
            );
            Ok(())
        }
        Command::Label => {
            eprintln!("   Gmail user: {}", config.gmail_user);
            eprintln!("   Credentials: {}\n", config.credentials_path.display());

            let summary = label(&config, &store).await.context("labeling pass failed")?;
            eprintln!(
                "   Done: {} messages seen, {} labeled ({} labels applied), {} failures",
                summary.messages_seen,
                summary.messages_labeled,
                summary.labels_applied,
                summary.failures
            );
            Ok(())
        }
    }
}

async fn open_store(config: &AppConfig) -> Result<RuleStore> {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    Ok(RuleStore::new(db))
}

async fn serve(config: &AppConfig, store: RuleStore) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    eprintln!("   Rule API: http://{addr}/rules\n");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(port = config.port, "Rule API server started");
    axum::serve(listener, rule_routes(store))
        .await
        .context("rule API server failed")?;
    Ok(())
}

/// One labeling pass. If Gmail rejects the stored credentials even after a
/// refresh, authorize interactively and run the pass again.
async fn label(config: &AppConfig, store: &RuleStore) -> Result<PassSummary> {
    let secrets = ClientSecrets::from_file(&config.credentials_path)?;
    let authenticator = Arc::new(Authenticator::new(secrets, config.token_path.clone()));
    let session = authenticator.session().await?;
    let mapping = load_mapping(store).await;

    match run_pass(config, &authenticator, session, &mapping).await {
        Err(Error::Provider(e)) if e.needs_reauthorization() => {
            tracing::warn!(error = %e, "Gmail rejected the stored credentials, reauthorizing");
            let session = authenticator.authorize_interactive().await?;
            run_pass(config, &authenticator, session, &mapping).await
        }
        other => other,
    }
}

async fn run_pass(
    config: &AppConfig,
    authenticator: &Arc<Authenticator>,
    session: Session,
    mapping: &KeywordMapping,
) -> Result<PassSummary> {
    let client: Arc<dyn MailSource> = Arc::new(
        GmailClient::with_base_url(&config.gmail_api_base, session, &config.gmail_user)
            .with_authenticator(Arc::clone(authenticator)),
    );
    Ok(Labeler::new(client).run(mapping).await?)
}

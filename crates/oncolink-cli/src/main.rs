//! Oncolink CLI: issue access links, upload documents under them, and erase sessions.
//!
//! Configuration comes from the environment (see `Config::from_env`). Access tokens are read
//! from `--token-file` or `ONCOLINK_ACCESS_TOKEN`, never from arguments.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use oncolink_cli::{declared_content_type, exit_code_for, init_tracing, read_token, ErrorOutput};
use oncolink_core::models::AccessToken;
use oncolink_core::{AppError, ByteReader, Config, RequestContext, SecureStream};
use oncolink_db::{
    setup_database, DocumentRepository, PgArtifactRepository, PgDocumentRepository, PgErasureStore,
    PgSessionRepository,
};
use oncolink_processing::{
    AnonymizationPolicy, Anonymizer, PdfTextExtractor, RoutingTextExtractor, TextExtractor,
    UploadValidator,
};
use oncolink_services::{
    AnthropicClient, AnthropicConfig, CredentialManager, IngestionDeps, IngestionPipeline,
    PromptTemplates, SessionEraser,
};
use oncolink_storage::{create_storage, Storage};
use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "oncolink", about = "Anonymous medical document intake")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a new single-use access link
    IssueLink {
        /// Lifetime in hours (defaults to ACCESS_LINK_TTL_HOURS)
        #[arg(long)]
        ttl_hours: Option<i64>,
    },
    /// Check that an access link is still usable
    ValidateLink {
        #[arg(long)]
        token_file: Option<PathBuf>,
    },
    /// Upload and analyse a document under an access link
    Upload {
        /// Path to the document
        file: PathBuf,
        /// Declared content type (guessed from the extension when omitted)
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        token_file: Option<PathBuf>,
    },
    /// Mark an access link as used; no further uploads are accepted
    Finish {
        #[arg(long)]
        token_file: Option<PathBuf>,
    },
    /// List the documents uploaded under an access link
    Documents {
        #[arg(long)]
        token_file: Option<PathBuf>,
    },
    /// Erase a session and everything it owns
    EraseSession {
        /// Session UUID
        session_id: Uuid,
    },
    /// Erase one document of a session
    EraseDocument {
        /// Session UUID
        session_id: Uuid,
        /// Document UUID
        document_id: Uuid,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[derive(Serialize)]
struct IssuedLink {
    session_id: Uuid,
    token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<AppError>() {
            Some(app_error) => {
                tracing::debug!(error = %app_error.detailed_message(), "Command failed");
                match serde_json::to_string(&ErrorOutput::from(app_error)) {
                    Ok(json) => eprintln!("{}", json),
                    Err(_) => eprintln!("Error: {}", app_error),
                }
                ExitCode::from(exit_code_for(app_error))
            }
            None => {
                eprintln!("Error: {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_tracing(&config.log_format);

    let pool = setup_database(&config).await?;
    let ctx = request_context(&config);
    let env = |key: &str| std::env::var(key).ok();

    match cli.command {
        Commands::IssueLink { ttl_hours } => {
            let credentials = credential_manager(&config, &pool);
            let issued = credentials
                .issue(&ctx, ttl_hours.map(chrono::Duration::hours))
                .await?;
            print_json(&IssuedLink {
                session_id: issued.session_id,
                token: issued.token.expose().to_string(),
                expires_at: issued.expires_at,
            })?;
        }
        Commands::ValidateLink { token_file } => {
            let token = read_token(token_file.as_deref(), env)?;
            let session_id = credential_manager(&config, &pool)
                .validate(&ctx, &token)
                .await?;
            print_json(&serde_json::json!({ "session_id": session_id, "valid": true }))?;
        }
        Commands::Upload {
            file,
            content_type,
            token_file,
        } => {
            let token = read_token(token_file.as_deref(), env)?;
            let declared = declared_content_type(&file, content_type.as_deref())?;
            let session_id = credential_manager(&config, &pool)
                .validate(&ctx, &token)
                .await?;

            let storage = create_storage(&config).await?;
            let pipeline = ingestion_pipeline(&config, &pool, storage)?;
            let outcome = pipeline
                .process_document(
                    &ctx,
                    &session_id.to_string(),
                    &display_name(&file),
                    &declared,
                    open_upload(&file).await?,
                )
                .await?;
            print_json(&outcome)?;
        }
        Commands::Finish { token_file } => {
            let token = read_token(token_file.as_deref(), env)?;
            finish(&ctx, &credential_manager(&config, &pool), &token).await?;
        }
        Commands::Documents { token_file } => {
            let token = read_token(token_file.as_deref(), env)?;
            let session = credential_manager(&config, &pool)
                .resolve(&ctx, &token)
                .await?;
            let documents = PgDocumentRepository::new(pool.clone())
                .list_documents(session.id)
                .await?;
            print_json(&documents)?;
        }
        Commands::EraseSession { session_id } => {
            let report = session_eraser(&config, &pool)
                .await?
                .erase_session(&ctx, session_id)
                .await?;
            print_json(&report)?;
        }
        Commands::EraseDocument {
            session_id,
            document_id,
        } => {
            let report = session_eraser(&config, &pool)
                .await?
                .erase_document(&ctx, session_id, document_id)
                .await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

/// Request context bounded by `REQUEST_TIMEOUT_SECS` and cancelled on Ctrl-C.
fn request_context(config: &Config) -> RequestContext {
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    RequestContext::new()
        .with_timeout(config.request_timeout())
        .with_cancellation(shutdown)
}

async fn finish(
    ctx: &RequestContext,
    credentials: &CredentialManager,
    token: &AccessToken,
) -> anyhow::Result<()> {
    let session = credentials.resolve(ctx, token).await?;
    credentials.invalidate(ctx, token).await?;
    print_json(&serde_json::json!({ "session_id": session.id, "used": true }))
}

fn credential_manager(config: &Config, pool: &PgPool) -> CredentialManager {
    CredentialManager::new(
        Arc::new(PgSessionRepository::new(pool.clone())),
        config.access_link_ttl(),
    )
}

async fn session_eraser(config: &Config, pool: &PgPool) -> anyhow::Result<SessionEraser> {
    let storage = create_storage(config).await?;
    Ok(SessionEraser::new(
        Arc::new(PgErasureStore::new(pool.clone())),
        storage,
    ))
}

fn ingestion_pipeline(
    config: &Config,
    pool: &PgPool,
    storage: Arc<dyn Storage>,
) -> anyhow::Result<IngestionPipeline> {
    let anthropic = AnthropicConfig::from_config(config)
        .context("ANTHROPIC_API_KEY must be set to analyse uploads")?;
    let templates = Arc::new(PromptTemplates::new(config.prompt_template_dir.clone()));
    let analysis = Arc::new(AnthropicClient::new(anthropic, templates)?);

    let policy = match &config.anonymization_policy_path {
        Some(path) => AnonymizationPolicy::from_json_file(path)?,
        None => AnonymizationPolicy::default(),
    };

    let key = config.encryption_key_bytes()?;

    Ok(IngestionPipeline::new(IngestionDeps {
        storage,
        secure_stream: SecureStream::from_key_bytes(&key)?,
        documents: Arc::new(PgDocumentRepository::new(pool.clone())),
        artifacts: Arc::new(PgArtifactRepository::new(pool.clone())),
        text_extractor: Arc::new(RoutingTextExtractor::new(
            Arc::new(PdfTextExtractor),
            Some(analysis.clone() as Arc<dyn TextExtractor>),
        )),
        analysis,
        validator: UploadValidator::new(
            config.max_upload_size_bytes,
            config.allowed_content_types.clone(),
        ),
        anonymizer: Anonymizer::new(&policy)?,
        analysis_timeout: config.analysis_timeout(),
    }))
}

async fn open_upload(path: &Path) -> anyhow::Result<ByteReader> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::pin(file))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

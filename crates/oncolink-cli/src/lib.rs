//! Helpers shared by the `oncolink` binary.

use std::path::Path;

use anyhow::Context;
use oncolink_core::models::AccessToken;
use oncolink_core::{AppError, ErrorMetadata};
use serde::Serialize;

/// Environment variable consulted when no `--token-file` is given.
pub const TOKEN_ENV_VAR: &str = "ONCOLINK_ACCESS_TOKEN";

/// Initialize tracing. `RUST_LOG` overrides the default `oncolink=info` filter; `json`
/// switches to the JSON formatter.
pub fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("oncolink=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read the access token from `token_file`, or from [`TOKEN_ENV_VAR`] through `env`.
///
/// Tokens are never taken from the command line, where they would end up in shell history
/// and process listings.
pub fn read_token<F>(token_file: Option<&Path>, env: F) -> anyhow::Result<AccessToken>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match token_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read token file {}", path.display()))?,
        None => env(TOKEN_ENV_VAR).with_context(|| {
            format!("Pass --token-file or set {} to supply the access token", TOKEN_ENV_VAR)
        })?,
    };

    let token = raw.trim();
    if token.is_empty() {
        anyhow::bail!("The access token is empty");
    }
    Ok(AccessToken::new(token))
}

/// Declared content type: the explicit value if given, otherwise a guess from the file
/// extension. The upload is still sniffed and checked against it.
pub fn declared_content_type(path: &Path, explicit: Option<&str>) -> anyhow::Result<String> {
    if let Some(content_type) = explicit {
        return Ok(content_type.trim().to_lowercase());
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let guessed = match extension.as_str() {
        "dcm" | "dicom" => "application/dicom",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        _ => anyhow::bail!(
            "Cannot infer a content type for {}; pass --content-type",
            path.display()
        ),
    };
    Ok(guessed.to_string())
}

/// Machine-readable failure printed to stderr.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
    pub recoverable: bool,
}

impl From<&AppError> for ErrorOutput {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.error_code(),
            message: err.client_message(),
            suggested_action: err.suggested_action(),
            recoverable: err.is_recoverable(),
        }
    }
}

/// Process exit code for a failed command: 2 for caller mistakes, 1 otherwise.
pub fn exit_code_for(err: &AppError) -> u8 {
    match err.http_status_code() {
        400..=499 => 2,
        _ => 1,
    }
}

//! Configuration module
//!
//! Configuration is read once from the environment by the composition root and handed to
//! constructors. Nothing in the library reads the environment on its own.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};

use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const ACCESS_LINK_TTL_HOURS: i64 = 24;
const MAX_UPLOAD_SIZE_MB: u64 = 100;
const SECURE_DELETE_PASSES: u32 = 1;
const ANALYSIS_TIMEOUT_SECS: u64 = 60;
const REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_ALLOWED_CONTENT_TYPES: &str =
    "application/dicom,application/pdf,image/jpeg,image/png,image/tiff";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Application configuration.
#[derive(Clone)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_secure_delete_passes: u32,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub aws_region: Option<String>,
    /// Base64-encoded 32-byte key. Supplied by the secrets manager in production.
    pub encryption_key: String,
    // Access links and uploads
    pub access_link_ttl_hours: i64,
    pub max_upload_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    // Collaborators
    pub analysis_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub prompt_template_dir: Option<PathBuf>,
    pub anonymization_policy_path: Option<PathBuf>,
    pub log_format: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("db_max_connections", &self.db_max_connections)
            .field("storage_backend", &self.storage_backend)
            .field("local_storage_path", &self.local_storage_path)
            .field("s3_bucket", &self.s3_bucket)
            .field("encryption_key", &"<redacted>")
            .field("access_link_ttl_hours", &self.access_link_ttl_hours)
            .field("max_upload_size_bytes", &self.max_upload_size_bytes)
            .field("allowed_content_types", &self.allowed_content_types)
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<redacted>"))
            .field("anthropic_model", &self.anthropic_model)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env` when present).
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (e.g. a map in tests; avoids env mutation).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::Local,
        };

        let max_upload_size_mb = parse_or(var("MAX_UPLOAD_SIZE_MB"), MAX_UPLOAD_SIZE_MB);

        let allowed_content_types = var("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|| DEFAULT_ALLOWED_CONTENT_TYPES.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            environment: var("ENVIRONMENT")
                .or_else(|| var("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            database_url: var("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: parse_or(var("DB_MAX_CONNECTIONS"), MAX_CONNECTIONS),
            db_timeout_seconds: parse_or(var("DB_TIMEOUT_SECONDS"), CONNECTION_TIMEOUT_SECS),
            storage_backend,
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_secure_delete_passes: parse_or(
                var("LOCAL_SECURE_DELETE_PASSES"),
                SECURE_DELETE_PASSES,
            ),
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION"),
            s3_endpoint: var("S3_ENDPOINT"),
            aws_region: var("AWS_REGION"),
            encryption_key: var("ENCRYPTION_KEY")
                .ok_or_else(|| anyhow::anyhow!("ENCRYPTION_KEY must be set"))?,
            access_link_ttl_hours: parse_or(var("ACCESS_LINK_TTL_HOURS"), ACCESS_LINK_TTL_HOURS),
            max_upload_size_bytes: max_upload_size_mb.saturating_mul(1024 * 1024),
            allowed_content_types,
            analysis_timeout_secs: parse_or(var("ANALYSIS_TIMEOUT_SECS"), ANALYSIS_TIMEOUT_SECS),
            request_timeout_secs: parse_or(var("REQUEST_TIMEOUT_SECS"), REQUEST_TIMEOUT_SECS),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            anthropic_model: var("ANTHROPIC_MODEL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            anthropic_base_url: var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            prompt_template_dir: var("PROMPT_TEMPLATE_DIR").map(PathBuf::from),
            anonymization_policy_path: var("ANONYMIZATION_POLICY_PATH").map(PathBuf::from),
            log_format: var("LOG_FORMAT")
                .unwrap_or_else(|| "pretty".to_string())
                .to_lowercase(),
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.database_url.starts_with("postgresql://")
            || self.database_url.starts_with("postgres://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.is_production() && self.local_secure_delete_passes == 0 {
                    return Err(anyhow::anyhow!(
                        "LOCAL_SECURE_DELETE_PASSES must be at least 1 in production"
                    ));
                }
            }
        }

        let key = self.encryption_key_bytes()?;
        if key.len() != 32 {
            return Err(anyhow::anyhow!(
                "ENCRYPTION_KEY must decode to 32 bytes (got {})",
                key.len()
            ));
        }

        if self.access_link_ttl_hours <= 0 {
            return Err(anyhow::anyhow!("ACCESS_LINK_TTL_HOURS must be positive"));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be positive"));
        }

        if self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_CONTENT_TYPES must list at least one content type"
            ));
        }

        if self.analysis_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "ANALYSIS_TIMEOUT_SECS and REQUEST_TIMEOUT_SECS must be positive"
            ));
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(anyhow::anyhow!("LOG_FORMAT must be 'pretty' or 'json'"));
        }

        Ok(())
    }

    /// Decode `ENCRYPTION_KEY` into raw key bytes.
    pub fn encryption_key_bytes(&self) -> Result<Vec<u8>, anyhow::Error> {
        general_purpose::STANDARD
            .decode(self.encryption_key.trim())
            .map_err(|e| anyhow::anyhow!("Failed to decode ENCRYPTION_KEY: {}", e))
    }

    pub fn access_link_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.access_link_ttl_hours)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn s3_effective_region(&self) -> Option<&str> {
        self.s3_region.as_deref().or(self.aws_region.as_deref())
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("DATABASE_URL", "postgres://localhost/oncolink".to_string());
        vars.insert("LOCAL_STORAGE_PATH", "/tmp/oncolink".to_string());
        vars.insert(
            "ENCRYPTION_KEY",
            general_purpose::STANDARD.encode([7u8; 32]),
        );
        vars
    }

    fn load(vars: &HashMap<&'static str, String>) -> anyhow::Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.access_link_ttl_hours, 24);
        assert_eq!(config.max_upload_size_bytes, 100 * 1024 * 1024);
        assert_eq!(config.local_secure_delete_passes, 1);
        assert_eq!(config.analysis_timeout(), Duration::from_secs(60));
        assert!(config
            .allowed_content_types
            .contains(&"application/dicom".to_string()));
        assert!(!config.is_production());
    }

    #[test]
    fn test_missing_encryption_key_fails() {
        let mut vars = base_vars();
        vars.remove("ENCRYPTION_KEY");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_short_key_rejected_by_validate() {
        let mut vars = base_vars();
        vars.insert("ENCRYPTION_KEY", general_purpose::STANDARD.encode([1u8; 16]));
        let config = load(&vars).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_requires_bucket_and_region() {
        let mut vars = base_vars();
        vars.insert("STORAGE_BACKEND", "s3".to_string());
        let config = load(&vars).unwrap();
        assert!(config.validate().is_err());

        vars.insert("S3_BUCKET", "uploads".to_string());
        vars.insert("AWS_REGION", "eu-west-1".to_string());
        let config = load(&vars).unwrap();
        config.validate().unwrap();
        assert_eq!(config.s3_effective_region(), Some("eu-west-1"));
    }

    #[test]
    fn test_content_type_list_is_normalised() {
        let mut vars = base_vars();
        vars.insert(
            "ALLOWED_CONTENT_TYPES",
            " Application/PDF , image/png,,".to_string(),
        );
        let config = load(&vars).unwrap();
        assert_eq!(
            config.allowed_content_types,
            vec!["application/pdf".to_string(), "image/png".to_string()]
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("ANTHROPIC_API_KEY", "sk-secret".to_string());
        let config = load(&vars).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains(&config.encryption_key));
    }
}

use crate::entry::EntryStoreConfig;
use crate::issuer::{IssuerSettings, RetryPolicy};
use crate::object_store::StorageBackend;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Main configuration structure that can be loaded from CLI, config file, or environment
///
/// Example configuration file content
/// # One-time URL configuration
///
/// # Server configuration
/// listen_on_port = 32145     # distribution: edge validator + assets
/// internal_port = 32146      # issuer: GET /get-url
/// workspace = "./data"
/// assets_root = "./data/assets"  # local object store root, defaults to {workspace}/assets
///
/// # Object store (where redeemed assets are read from)
/// storage_backend = "s3"     # Options: "local" or "s3"
/// s3_bucket = "my-assets"
/// s3_endpoint = "http://localhost:9000"  # Optional: for MinIO or custom S3
/// s3_region = "us-east-1"                # Optional
/// s3_access_key_id = "minioadmin"
/// s3_secret_access_key = "minioadmin"
///
/// # Entry store
/// entry_store = "sqlite"     # Options: "sqlite" or "memory"
/// entry_store_path = "./data/entries.db"
///
/// # Issued URLs
/// public_url = "https://d111111abcdef8.cloudfront.net"
/// asset_path = "downloads/report.pdf"
/// token_ttl_secs = 3600
///
/// # Budgets
/// edge_timeout_ms = 1000
/// issue_max_retries = 3
/// issue_backoff_ms = 50
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port the distribution (asset redemption) listens on
    #[arg(short, long, default_value_t = 32145)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Port the issuer API listens on
    #[arg(long, default_value_t = 32146)]
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Working directory holding the asset root and the default entry database
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Local object store root (defaults to {workspace}/assets)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_root: Option<String>,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Object store backend: local or s3
    #[arg(short, long, default_value = "local")]
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,

    /// S3 bucket name (required when storage-backend is s3)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,

    /// S3 endpoint (for MinIO/custom S3)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,

    /// S3 access key ID
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_access_key_id: Option<String>,

    /// S3 secret access key
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_secret_access_key: Option<String>,

    /// Entry store backend: sqlite or memory
    #[arg(short, long, default_value = "sqlite")]
    #[serde(default = "default_entry_store")]
    pub entry_store: String,

    /// SQLite database file (defaults to {workspace}/entries.db)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_store_path: Option<String>,

    /// Public address of the distribution, used to build issued URLs
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Object key embedded in every issued URL
    #[arg(long, default_value = "asset")]
    #[serde(default = "default_asset_path")]
    pub asset_path: String,

    /// Seconds an issued URL stays redeemable (0 = no expiry)
    #[arg(long, default_value_t = 3600)]
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Time budget of one entry store call on the redemption path
    #[arg(long, default_value_t = 1000)]
    #[serde(default = "default_edge_timeout_ms")]
    pub edge_timeout_ms: u64,

    /// Entry store retries when issuing a URL
    #[arg(long, default_value_t = 3)]
    #[serde(default = "default_issue_max_retries")]
    pub issue_max_retries: u32,

    /// First issuer backoff delay, doubled on each retry
    #[arg(long, default_value_t = 50)]
    #[serde(default = "default_issue_backoff_ms")]
    pub issue_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            internal_port: default_internal_port(),
            workspace: default_workspace(),
            assets_root: None,
            config: None,
            storage_backend: default_storage_backend(),
            s3_bucket: None,
            s3_endpoint: None,
            s3_region: None,
            s3_access_key_id: None,
            s3_secret_access_key: None,
            entry_store: default_entry_store(),
            entry_store_path: None,
            public_url: None,
            asset_path: default_asset_path(),
            token_ttl_secs: default_token_ttl_secs(),
            edge_timeout_ms: default_edge_timeout_ms(),
            issue_max_retries: default_issue_max_retries(),
            issue_backoff_ms: default_issue_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> anyhow::Result<Self> {
        // First parse CLI args
        let mut config = Config::parse();

        // If a config file is specified, load it and merge
        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.internal_port == default_internal_port() {
            self.internal_port = file_config.internal_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.storage_backend == default_storage_backend() {
            self.storage_backend = file_config.storage_backend;
        }
        if self.entry_store == default_entry_store() {
            self.entry_store = file_config.entry_store;
        }
        if self.asset_path == default_asset_path() {
            self.asset_path = file_config.asset_path;
        }
        if self.token_ttl_secs == default_token_ttl_secs() {
            self.token_ttl_secs = file_config.token_ttl_secs;
        }
        if self.edge_timeout_ms == default_edge_timeout_ms() {
            self.edge_timeout_ms = file_config.edge_timeout_ms;
        }
        if self.issue_max_retries == default_issue_max_retries() {
            self.issue_max_retries = file_config.issue_max_retries;
        }
        if self.issue_backoff_ms == default_issue_backoff_ms() {
            self.issue_backoff_ms = file_config.issue_backoff_ms;
        }

        // For Option fields, CLI takes precedence if Some
        if self.s3_bucket.is_none() {
            self.s3_bucket = file_config.s3_bucket;
        }
        if self.s3_endpoint.is_none() {
            self.s3_endpoint = file_config.s3_endpoint;
        }
        if self.s3_region.is_none() {
            self.s3_region = file_config.s3_region;
        }
        if self.s3_access_key_id.is_none() {
            self.s3_access_key_id = file_config.s3_access_key_id;
        }
        if self.s3_secret_access_key.is_none() {
            self.s3_secret_access_key = file_config.s3_secret_access_key;
        }
        if self.entry_store_path.is_none() {
            self.entry_store_path = file_config.entry_store_path;
        }
        if self.assets_root.is_none() {
            self.assets_root = file_config.assets_root;
        }
        if self.public_url.is_none() {
            self.public_url = file_config.public_url;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.storage_backend.as_str() {
            "local" => {}
            "s3" => {
                if self.s3_bucket.as_deref().is_none_or(str::is_empty) {
                    return Err(anyhow::anyhow!(
                        "S3 bucket name is required when backend is 's3'"
                    ));
                }
                if self.s3_access_key_id.as_deref().is_none_or(str::is_empty) {
                    return Err(anyhow::anyhow!(
                        "S3 access key ID is required when backend is 's3'"
                    ));
                }
                if self
                    .s3_secret_access_key
                    .as_deref()
                    .is_none_or(str::is_empty)
                {
                    return Err(anyhow::anyhow!(
                        "S3 secret access key is required when backend is 's3'"
                    ));
                }
            }
            backend => {
                return Err(anyhow::anyhow!(
                    "Unsupported storage backend: {backend}. Use 'local' or 's3'"
                ));
            }
        }

        match self.entry_store.as_str() {
            "sqlite" | "memory" => {}
            store => {
                return Err(anyhow::anyhow!(
                    "Unsupported entry store: {store}. Use 'sqlite' or 'memory'"
                ));
            }
        }

        if let Some(path) = &self.entry_store_path
            && path.is_empty()
        {
            return Err(anyhow::anyhow!("Entry store path cannot be empty"));
        }

        // Anything under the local asset root is downloadable with a single token
        if self.storage_backend == "local"
            && let EntryStoreConfig::Sqlite { path } = self.entry_store_config()
        {
            let assets_root = lexical_absolute(&self.assets_root())?;
            if lexical_absolute(&path)?.starts_with(&assets_root) {
                return Err(anyhow::anyhow!(
                    "Entry store path {} must live outside the asset root {}",
                    path.display(),
                    assets_root.display()
                ));
            }
        }

        if let Some(public_url) = &self.public_url {
            let host = public_url
                .trim()
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            if host.is_empty() || host.contains('?') || host.contains('#') {
                return Err(anyhow::anyhow!(
                    "Public URL must be a host or an http(s) base URL without query"
                ));
            }
        }

        let asset_path = self.asset_path.trim_start_matches('/');
        if asset_path.is_empty() || asset_path.contains('?') || asset_path.contains('#') {
            return Err(anyhow::anyhow!(
                "Asset path must be a non-empty object key without query or fragment"
            ));
        }

        if self.edge_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Edge timeout must be greater than 0"));
        }

        if i64::try_from(self.token_ttl_secs).is_err() {
            return Err(anyhow::anyhow!(
                "Token TTL must be at most {} seconds",
                i64::MAX
            ));
        }

        Ok(())
    }

    /// Object store backend described by this configuration
    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.storage_backend.as_str() {
            "local" => Ok(StorageBackend::Local {
                root: self.assets_root(),
            }),
            "s3" => {
                let s3 = self
                    .to_s3_config()
                    .ok_or_else(|| anyhow::anyhow!("S3 configuration is incomplete"))?;
                Ok(StorageBackend::S3 {
                    bucket: s3.bucket,
                    endpoint: s3.endpoint,
                    region: s3.region,
                    access_key_id: s3.access_key_id,
                    secret_access_key: s3.secret_access_key,
                })
            }
            backend => Err(anyhow::anyhow!(
                "Unsupported storage backend: {backend}. Use 'local' or 's3'"
            )),
        }
    }

    /// Convert to S3 storage backend configuration
    pub fn to_s3_config(&self) -> Option<S3Config> {
        if self.storage_backend != "s3" {
            return None;
        }

        Some(S3Config {
            bucket: self.s3_bucket.clone()?,
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            access_key_id: self.s3_access_key_id.clone()?,
            secret_access_key: self.s3_secret_access_key.clone()?,
        })
    }

    /// Root of the local object store
    pub fn assets_root(&self) -> PathBuf {
        self.assets_root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&self.workspace).join(ASSETS_DIR))
    }

    pub fn entry_store_config(&self) -> EntryStoreConfig {
        match self.entry_store.as_str() {
            "memory" => EntryStoreConfig::Memory,
            _ => EntryStoreConfig::Sqlite {
                path: self
                    .entry_store_path
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| Path::new(&self.workspace).join("entries.db")),
            },
        }
    }

    /// Public distribution address, falling back to the local listener
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.listen_on_port))
    }

    pub fn issuer_settings(&self) -> IssuerSettings {
        IssuerSettings {
            public_url: self.public_url(),
            asset_path: self.asset_path.clone(),
            token_ttl_secs: self.token_ttl_secs,
            retry: RetryPolicy {
                max_retries: self.issue_max_retries,
                base_delay: Duration::from_millis(self.issue_backoff_ms),
            },
        }
    }

    pub fn edge_timeout(&self) -> Duration {
        Duration::from_millis(self.edge_timeout_ms)
    }
}

// S3 configuration subset
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

const ASSETS_DIR: &str = "assets";

/// Absolute form of `path` with `.` and `..` folded, without touching the filesystem
fn lexical_absolute(path: &Path) -> anyhow::Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

// Default value functions
fn default_port() -> u16 {
    32145
}

fn default_internal_port() -> u16 {
    32146
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_entry_store() -> String {
    "sqlite".to_string()
}

fn default_asset_path() -> String {
    "asset".to_string()
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_edge_timeout_ms() -> u64 {
    1000
}

fn default_issue_max_retries() -> u32 {
    3
}

fn default_issue_backoff_ms() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_from_cli() {
        let cli_content = [
            "CLI",
            "--listen-on-port",
            "8080",
            "--internal-port",
            "8081",
            "--workspace",
            "/tmp/test",
            "--entry-store",
            "memory",
            "--public-url",
            "https://cdn.example.com",
            "--asset-path",
            "files/report.pdf",
            "--token-ttl-secs",
            "0",
            "--edge-timeout-ms",
            "250",
        ];

        let config = Config::try_parse_from(cli_content).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.internal_port, 8081);
        assert_eq!(config.entry_store_config(), EntryStoreConfig::Memory);
        assert_eq!(config.public_url(), "https://cdn.example.com");
        assert_eq!(config.token_ttl_secs, 0);
        assert_eq!(config.edge_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            listen_on_port = 8080
            internal_port = 8081
            workspace = "/tmp/test"
            storage_backend = "s3"
            s3_bucket = "assets"
            s3_access_key_id = "minioadmin"
            s3_secret_access_key = "minioadmin"
            entry_store = "sqlite"
            entry_store_path = "/var/lib/one-time-url/entries.db"
            public_url = "d111111abcdef8.cloudfront.net"
            issue_max_retries = 5
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.asset_path, "asset");
        assert_eq!(config.token_ttl_secs, 3600);
        assert_eq!(
            config.entry_store_config(),
            EntryStoreConfig::Sqlite {
                path: PathBuf::from("/var/lib/one-time-url/entries.db")
            }
        );
        assert!(matches!(
            config.storage_backend().unwrap(),
            StorageBackend::S3 { ref bucket, .. } if bucket == "assets"
        ));
        assert_eq!(config.issuer_settings().retry.max_retries, 5);
    }

    #[test]
    fn test_default_entry_store_lives_in_workspace() {
        let config = Config {
            workspace: "/srv/data".into(),
            ..Default::default()
        };
        assert_eq!(
            config.entry_store_config(),
            EntryStoreConfig::Sqlite {
                path: PathBuf::from("/srv/data/entries.db")
            }
        );
    }

    #[test]
    fn test_assets_root_separate_from_entry_store() {
        let config = Config {
            workspace: "/srv/data".into(),
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.assets_root(), PathBuf::from("/srv/data/assets"));
        assert!(matches!(
            config.storage_backend().unwrap(),
            StorageBackend::Local { ref root } if root == Path::new("/srv/data/assets")
        ));
    }

    #[test]
    fn test_validate_rejects_entry_store_inside_assets_root() {
        let db_in_workspace_root = Config {
            workspace: "/srv/data".into(),
            assets_root: Some("/srv/data".into()),
            ..Default::default()
        };
        assert!(db_in_workspace_root.validate().is_err());

        let db_in_subdir = Config {
            workspace: "/srv/data".into(),
            entry_store_path: Some("/srv/data/assets/private/entries.db".into()),
            ..Default::default()
        };
        assert!(db_in_subdir.validate().is_err());

        let db_via_parent_segments = Config {
            workspace: "/srv/data".into(),
            entry_store_path: Some("/srv/data/other/../assets/entries.db".into()),
            ..Default::default()
        };
        assert!(db_via_parent_segments.validate().is_err());

        // Memory entries never touch the filesystem
        let memory = Config {
            assets_root: Some(".".into()),
            entry_store: "memory".into(),
            ..Default::default()
        };
        assert!(memory.validate().is_ok());

        // Remote assets cannot expose local files
        let remote = Config {
            storage_backend: "s3".into(),
            s3_bucket: Some("assets".into()),
            s3_access_key_id: Some("key".into()),
            s3_secret_access_key: Some("secret".into()),
            assets_root: Some(".".into()),
            ..Default::default()
        };
        assert!(remote.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_ttl() {
        let config = Config {
            token_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_url_falls_back_to_listener() {
        let config = Config {
            listen_on_port: 9000,
            ..Default::default()
        };
        assert_eq!(config.public_url(), "http://127.0.0.1:9000");
        assert_eq!(config.issuer_settings().public_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_config_merge_with_file() {
        let file_config = Config {
            public_url: Some("https://cdn.example.com".into()),
            entry_store: "memory".into(),
            token_ttl_secs: 60,
            ..Default::default()
        };

        let cli_config = Config {
            listen_on_port: 9000,
            ..Default::default()
        };

        let merged = cli_config.merge_with_file(file_config);

        assert_eq!(merged.listen_on_port, 9000); // CLI value takes precedence
        assert_eq!(merged.public_url.as_deref(), Some("https://cdn.example.com"));
        assert_eq!(merged.entry_store, "memory");
        assert_eq!(merged.token_ttl_secs, 60);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let s3_without_bucket = Config {
            storage_backend: "s3".into(),
            ..Default::default()
        };
        assert!(s3_without_bucket.validate().is_err());

        let unknown_store = Config {
            entry_store: "redis".into(),
            ..Default::default()
        };
        assert!(unknown_store.validate().is_err());

        let empty_asset = Config {
            asset_path: "/".into(),
            ..Default::default()
        };
        assert!(empty_asset.validate().is_err());

        let query_in_url = Config {
            public_url: Some("https://cdn.example.com/?x=1".into()),
            ..Default::default()
        };
        assert!(query_in_url.validate().is_err());

        let zero_budget = Config {
            edge_timeout_ms: 0,
            ..Default::default()
        };
        assert!(zero_budget.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}

//! Configuration structures and loading

use std::path::PathBuf;
use anyhow::{Result, Context};
use serde::Deserialize;

/// Top-level controller configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// HTTP server configuration
    pub api: ApiConfiguration,

    /// Local filesystem layout
    pub system: SystemConfiguration,

    /// Snapshot/image registry configuration
    pub images: ImagesConfiguration,

    /// Instance fleet configuration
    pub instances: InstancesConfiguration,

    /// Results storage configuration
    pub results: ResultsConfiguration,

    /// Durable KV store configuration
    pub db: DbConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file, resolving relative paths against
    /// the file's own directory and creating any directories it names.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Configuration = toml::from_str(&content)
            .with_context(|| "Failed to parse configuration")?;

        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.system.resolve_paths(&base_dir);
        config.results.directory = SystemConfiguration::resolve_path(&config.results.directory, &base_dir);

        std::fs::create_dir_all(&config.system.data_directory)?;
        std::fs::create_dir_all(&config.system.tmp_directory)?;
        std::fs::create_dir_all(&config.system.log_directory)?;
        std::fs::create_dir_all(&config.results.directory)?;

        Ok(config)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    /// Host to bind to
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// SSL configuration
    #[serde(default)]
    pub ssl: SslConfiguration,

    /// Maximum upload size in MB
    #[serde(default = "default_upload_limit")]
    pub upload_limit: u64,
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8081
}

fn default_upload_limit() -> u64 {
    500
}

/// SSL configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

/// Local filesystem layout
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    /// Directory for volume staging data
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    /// Temporary directory for build contexts
    #[serde(default = "default_tmp_directory")]
    pub tmp_directory: PathBuf,

    /// Log directory
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    /// Interval, in seconds, between fleet tidy sweeps
    #[serde(default = "default_tidy_interval")]
    pub tidy_interval_seconds: u64,
}

impl SystemConfiguration {
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.data_directory = Self::resolve_path(&self.data_directory, base_dir);
        self.tmp_directory = Self::resolve_path(&self.tmp_directory, base_dir);
        self.log_directory = Self::resolve_path(&self.log_directory, base_dir);
    }

    pub fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            let resolved = base_dir.join(path);
            resolved.canonicalize().unwrap_or_else(|_| Self::normalize_path(&resolved))
        }
    }

    fn normalize_path(path: &std::path::Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::ParentDir => {
                    components.pop();
                }
                std::path::Component::CurDir => {}
                c => components.push(c),
            }
        }
        components.iter().collect()
    }
}

fn default_data_directory() -> PathBuf {
    PathBuf::from(".plz/data")
}

fn default_tmp_directory() -> PathBuf {
    PathBuf::from(".plz/tmp")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".plz/logs")
}

fn default_tidy_interval() -> u64 {
    30
}

/// Which backend builds/stores snapshot images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImagesProvider {
    Local,
    AwsEcr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfiguration {
    /// "local" or "aws-ecr"
    pub provider: ImagesProvider,

    /// Docker daemon endpoint used to build/run images
    #[serde(default = "default_docker_host")]
    pub docker_host: String,

    /// Repository name images are tagged under
    #[serde(default = "default_repository")]
    pub repository: String,

    /// ECR registry URI (aws-ecr only)
    #[serde(default)]
    pub ecr_registry: Option<String>,

    /// Minutes an ECR login token is trusted before forcing re-auth
    #[serde(default = "default_ecr_login_validity_minutes")]
    pub ecr_login_validity_minutes: i64,

    /// Docker build/pull client timeout, in minutes
    #[serde(default = "default_docker_api_client_timeout_minutes")]
    pub docker_api_client_timeout_minutes: u64,
}

fn default_docker_host() -> String {
    #[cfg(target_os = "windows")]
    {
        "npipe:////./pipe/docker_engine".into()
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let colima = std::path::Path::new(&home).join(".colima/default/docker.sock");
            if colima.exists() {
                return format!("unix://{}", colima.display());
            }
            let desktop = std::path::Path::new(&home).join(".docker/run/docker.sock");
            if desktop.exists() {
                return format!("unix://{}", desktop.display());
            }
        }
        "/var/run/docker.sock".into()
    }
}

fn default_repository() -> String {
    "plz".into()
}

fn default_ecr_login_validity_minutes() -> i64 {
    60
}

fn default_docker_api_client_timeout_minutes() -> u64 {
    10
}

/// Which backend supplies execution instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstancesProvider {
    Localhost,
    AwsEc2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstancesConfiguration {
    /// "localhost" or "aws-ec2"
    pub provider: InstancesProvider,

    /// AWS region (aws-ec2 only)
    #[serde(default)]
    pub region: Option<String>,

    /// EC2 key pair name to launch workers with (aws-ec2 only)
    #[serde(default)]
    pub key_name: Option<String>,

    /// Tag value identifying this fleet's group (aws-ec2 only)
    #[serde(default = "default_group_name")]
    pub group_name: String,

    /// AMI id for newly spun-up workers (aws-ec2 only)
    #[serde(default)]
    pub worker_ami: Option<String>,

    /// Seconds to wait between acquisition poll attempts
    #[serde(default = "default_acquisition_delay")]
    pub acquisition_delay_seconds: u64,

    /// Maximum number of acquisition poll attempts before giving up
    #[serde(default = "default_max_acquisition_tries")]
    pub max_acquisition_tries: u32,

    /// Default idle budget, in seconds, for a freshly released instance
    #[serde(default = "default_max_idle_seconds")]
    pub default_max_idle_seconds: u64,
}

fn default_group_name() -> String {
    "plz".into()
}

fn default_acquisition_delay() -> u64 {
    10
}

fn default_max_acquisition_tries() -> u32 {
    5
}

fn default_max_idle_seconds() -> u64 {
    1800
}

/// Results storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfiguration {
    /// Directory under which per-execution result blobs are written
    #[serde(default = "default_results_directory")]
    pub directory: PathBuf,
}

fn default_results_directory() -> PathBuf {
    PathBuf::from(".plz/results")
}

/// Durable key-value store configuration (production backend: Redis)
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfiguration {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for DbConfiguration {
    fn default() -> Self {
        Self { url: default_redis_url() }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

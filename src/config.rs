//! TOML configuration and environment credentials.
//!
//! Every section has defaults, so an empty (or absent) file is a valid
//! configuration. Credentials are never read from the file; they come from
//! the process environment (see [`Credentials`]).
//!
//! ```toml
//! [scan]
//! root = "generated-articles"
//! include_globs = ["**/*.md"]
//!
//! [generator]
//! model = "gemini-2.0-flash-exp-image-generation"
//! max_retries = 5
//!
//! [run]
//! concurrency = 2
//! summary_path = "image_replacement_summary.txt"
//! ```

use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default location of the optional config file.
pub const DEFAULT_CONFIG_PATH: &str = "./config/backfill.toml";

/// Placeholder URL the article generator inserts for every new post.
pub const DEFAULT_PLACEHOLDER_URL: &str =
    "https://res.cloudinary.com/dbcpfy04c/image/upload/v1743184673/images_k6zam3.png";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub placeholder: PlaceholderConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("generated-articles")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaceholderConfig {
    /// Targets that are placeholders when matched exactly.
    #[serde(default = "default_placeholder_urls")]
    pub urls: Vec<String>,
    /// File-name prefixes marking a placeholder image (`placeholder.jpg`).
    #[serde(default = "default_file_prefixes")]
    pub file_prefixes: Vec<String>,
    /// Front-matter keys whose values are checked for placeholders.
    #[serde(default = "default_front_matter_keys")]
    pub front_matter_keys: Vec<String>,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            urls: default_placeholder_urls(),
            file_prefixes: default_file_prefixes(),
            front_matter_keys: default_front_matter_keys(),
        }
    }
}

fn default_placeholder_urls() -> Vec<String> {
    vec![DEFAULT_PLACEHOLDER_URL.to_string()]
}
fn default_file_prefixes() -> Vec<String> {
    vec!["placeholder".to_string()]
}
fn default_front_matter_keys() -> Vec<String> {
    ["image", "cover", "cover_image", "coverImage", "thumbnail"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// Must contain `{subject}`.
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            max_chars: default_max_chars(),
            style: None,
            size: None,
        }
    }
}

fn default_template() -> String {
    "Create a realistic blog header image for: {subject}".to_string()
}
fn default_max_chars() -> usize {
    480
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_provider")]
    pub provider: String,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_generator_provider(),
            model: default_generator_model(),
            endpoint: default_generator_endpoint(),
            timeout_secs: default_generator_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl GeneratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

fn default_generator_provider() -> String {
    "gemini".to_string()
}
fn default_generator_model() -> String {
    "gemini-2.0-flash-exp-image-generation".to_string()
}
fn default_generator_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_generator_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    5_000
}
fn default_max_delay_ms() -> u64 {
    120_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploaderConfig {
    #[serde(default = "default_uploader_provider")]
    pub provider: String,
    #[serde(default = "default_uploader_endpoint")]
    pub endpoint: String,
    /// Used for unsigned uploads (no `CLOUDINARY_API_SECRET`).
    #[serde(default = "default_upload_preset")]
    pub upload_preset: String,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default = "default_uploader_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            provider: default_uploader_provider(),
            endpoint: default_uploader_endpoint(),
            upload_preset: default_upload_preset(),
            folder: None,
            timeout_secs: default_uploader_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl UploaderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

fn default_uploader_provider() -> String {
    "cloudinary".to_string()
}
fn default_uploader_endpoint() -> String {
    "https://api.cloudinary.com/v1_1".to_string()
}
fn default_upload_preset() -> String {
    "ml_default".to_string()
}
fn default_uploader_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    /// Generation calls per minute across all workers; `0` disables pacing.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Consecutive failed markers before every worker pauses.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    10
}
fn default_burst() -> u32 {
    1
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_failure_cooldown_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Documents processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Wall-clock budget for the whole run; `0` means unbounded.
    #[serde(default = "default_wall_clock_secs")]
    pub wall_clock_secs: u64,
    #[serde(default = "default_summary_path")]
    pub summary_path: PathBuf,
    /// Save `<file>.bak` with the pre-rewrite text.
    #[serde(default)]
    pub write_backups: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            wall_clock_secs: default_wall_clock_secs(),
            summary_path: default_summary_path(),
            write_backups: false,
        }
    }
}

impl RunConfig {
    pub fn wall_clock(&self) -> Option<Duration> {
        match self.wall_clock_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_wall_clock_secs() -> u64 {
    50 * 60
}
fn default_summary_path() -> PathBuf {
    PathBuf::from("image_replacement_summary.txt")
}

/// Load the config file at `path`, or the defaults when `path` is `None`
/// and the default file does not exist.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    for pattern in config
        .scan
        .include_globs
        .iter()
        .chain(config.scan.exclude_globs.iter())
    {
        Glob::new(pattern).with_context(|| format!("Invalid glob in [scan]: {}", pattern))?;
    }
    if config.scan.include_globs.is_empty() {
        bail!("scan.include_globs must not be empty");
    }

    if config.placeholder.urls.is_empty() && config.placeholder.file_prefixes.is_empty() {
        bail!("placeholder.urls and placeholder.file_prefixes cannot both be empty");
    }

    if !config.prompt.template.contains("{subject}") {
        bail!("prompt.template must contain {{subject}}");
    }
    if config.prompt.max_chars < 32 {
        bail!("prompt.max_chars must be >= 32");
    }

    match config.generator.provider.as_str() {
        "gemini" => {}
        other => bail!("Unknown generator provider: '{}'. Must be gemini.", other),
    }
    match config.uploader.provider.as_str() {
        "cloudinary" => {}
        other => bail!("Unknown uploader provider: '{}'. Must be cloudinary.", other),
    }
    if config.generator.timeout_secs == 0 || config.uploader.timeout_secs == 0 {
        bail!("generator.timeout_secs and uploader.timeout_secs must be > 0");
    }

    if config.pacing.requests_per_minute > 0 && config.pacing.burst == 0 {
        bail!("pacing.burst must be >= 1 when pacing is enabled");
    }

    if config.run.concurrency == 0 {
        bail!("run.concurrency must be >= 1");
    }

    Ok(())
}

/// Service credentials, sourced from the execution environment.
#[derive(Clone)]
pub struct Credentials {
    pub gemini_api_key: String,
    pub cloudinary_cloud_name: String,
    pub cloudinary_api_key: String,
    /// Enables signed uploads when present.
    pub cloudinary_api_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cloudinary_cloud_name", &self.cloudinary_cloud_name)
            .field("cloudinary_api_secret", &self.cloudinary_api_secret.is_some())
            .finish_non_exhaustive()
    }
}

const REQUIRED_VARS: [&str; 3] = [
    "CLOUDINARY_CLOUD_NAME",
    "CLOUDINARY_API_KEY",
    "GEMINI_API_KEY",
];

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build credentials from an arbitrary variable lookup. Empty values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|name| get(name).is_none())
            .collect();
        if !missing.is_empty() {
            let report = REQUIRED_VARS
                .iter()
                .map(|name| {
                    let state = if missing.contains(name) { "not set" } else { "set" };
                    format!("{}: {}", name, state)
                })
                .collect::<Vec<_>>()
                .join(", ");
            bail!("Required environment variables are not set ({})", report);
        }

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            cloudinary_cloud_name: get("CLOUDINARY_CLOUD_NAME").unwrap_or_default(),
            cloudinary_api_key: get("CLOUDINARY_API_KEY").unwrap_or_default(),
            cloudinary_api_secret: get("CLOUDINARY_API_SECRET"),
        })
    }
}

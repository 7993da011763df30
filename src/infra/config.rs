use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::convention::DEFAULT_CODE_LENGTH;
use crate::infra::io::write_atomic;

/// Config file names looked up in the working directory, first hit wins.
pub const CONFIG_FILES: [&str; 4] = ["hrmlink.toml", "hrmlink.yaml", "hrmlink.json", ".hrmlink.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Deconvolution share layout
    pub share: ShareConfig,

    /// Remote image store defaults
    pub remote: RemoteConfig,

    /// Fuzzy raw-name recovery
    pub matching: MatchingConfig,

    /// Local project file
    pub project: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig
{
    /// Share root holding one folder per enrolled user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Length of the processing code embedded in result names
    pub code_length: usize,

    /// Extension of deconvolved images (without the dot)
    pub result_extension: String,

    /// Suffix of the tabular parameter report next to each result
    pub report_suffix: String,

    /// Suffix of the processing log next to each result
    pub log_suffix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig
{
    /// Default host, e.g. "https://omero.example.org"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig
{
    /// Best matches scoring below this are rejected
    pub min_similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig
{
    /// Project manifest used by `send` and `retrieve`
    pub file: PathBuf,
}

impl Default for ShareConfig
{
    fn default() -> Self
    {
        Self {
            root: None,
            code_length: DEFAULT_CODE_LENGTH,
            result_extension: "ids".to_string(),
            report_suffix: ".parameters.txt".to_string(),
            log_suffix: ".log.txt".to_string(),
        }
    }
}

impl Default for MatchingConfig
{
    fn default() -> Self
    {
        Self { min_similarity: 0.5 }
    }
}

impl Default for ProjectConfig
{
    fn default() -> Self
    {
        Self { file: PathBuf::from("project.json") }
    }
}

impl Config
{
    /// Reject values the rest of the pipeline cannot work with.
    pub fn validate(&self) -> Result<()>
    {
        if self.share.code_length == 0
        {
            anyhow::bail!("share.code_length must be at least 1");
        }

        let floor = self.matching.min_similarity;
        if !(floor > 0.0 && floor <= 1.0)
        {
            anyhow::bail!("matching.min_similarity must be in (0, 1], got {floor}");
        }

        if self
            .share
            .result_extension
            .trim_start_matches('.')
            .is_empty()
        {
            anyhow::bail!("share.result_extension must not be empty");
        }

        Ok(())
    }
}

/// Expand `~` and `$VAR` in a user-supplied path.
pub fn expand_path(path: &Path) -> Result<PathBuf>
{
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

pub fn load_config() -> Result<Config>
{
    load_config_from(Path::new("."))
}

/// Load configuration from the first config file found in `dir`, then
/// environment variables with the HRMLINK prefix (`HRMLINK_SHARE__ROOT`).
pub fn load_config_from(dir: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    for name in &CONFIG_FILES
    {
        let path = dir.join(name);
        if path.exists()
        {
            builder = builder.add_source(config::File::from(path));
            break;
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HRMLINK")
            .prefix_separator("_")
            .separator("__"),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    parsed.validate()?;

    Ok(parsed)
}

/// Write a starter `hrmlink.toml` into `args.path`, recording the share root
/// and remote host when given so later commands need neither flag.
pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let mut config = Config::default();
    if let Some(root) = args.root
    {
        if !root.is_dir()
        {
            tracing::warn!(root = %root.display(), "share root is not reachable yet");
        }
        config.share.root = Some(root);
    }
    config.remote.host = args.host;
    config.validate()?;

    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;
    write_atomic(&config_path, toml_string.as_bytes())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
        if config.share.root.is_none()
        {
            println!("Set share.root (or pass --root) before sending images");
        }
    }
    Ok(())
}

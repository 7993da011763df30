use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
}

#[derive(Parser)]
#[command(name = "hrml")]
#[command(
    about = "Shuttle microscopy images to a deconvolution share and bring the results back"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress bars and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy project images into the share's Raw folder
    Send(SendArgs),

    /// Bring every pending deconvolved result back into the project
    Retrieve(RetrieveArgs),

    /// List pending deconvolved results without transferring anything
    Discover(DiscoverArgs),

    /// Initialize a hrmlink.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Share location and identity, common to every transfer command
#[derive(Debug, Clone, Args)]
pub struct ShareArgs {
    /// Share root holding one folder per user (overrides share.root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Owner folder on the share
    #[arg(short, long)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct SendArgs {
    /// Project image names to send
    #[arg(required_unless_present = "all")]
    pub names: Vec<String>,

    /// Send every image of the project
    #[arg(long, conflicts_with = "names")]
    pub all: bool,

    /// Project manifest (overrides project.file)
    #[arg(long)]
    pub project: Option<PathBuf>,

    #[command(flatten)]
    pub share: ShareArgs,

    /// Remote store host, e.g. https://omero.example.org
    #[arg(long)]
    pub host: Option<String>,

    /// Replace images already present on the share
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RetrieveArgs {
    /// Project manifest (overrides project.file)
    #[arg(long)]
    pub project: Option<PathBuf>,

    #[command(flatten)]
    pub share: ShareArgs,

    /// Remote store host, e.g. https://omero.example.org
    #[arg(long)]
    pub host: Option<String>,

    /// Delete results and their companions from the share once imported
    #[arg(long)]
    pub delete_deconvolved: bool,

    /// Delete the raw copies from the share once imported
    #[arg(long)]
    pub delete_raw: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub share: ShareArgs,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,

    /// Share root to record as share.root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Remote store host to record as remote.host
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Directory to write the `hrml` completion script into
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print the script to stdout (the default without --out-dir)
    #[arg(long, conflicts_with = "out_dir")]
    pub stdout: bool,
}

//! Clap derive structures for the `acikit` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// acikit -- query, push and watch fabric controller objects
#[derive(Debug, Parser)]
#[command(
    name = "acikit",
    version,
    about = "Query, push and watch fabric controller objects",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Controller profile to use
    #[arg(long, short = 'p', env = "ACIKIT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Controller URL (overrides profile)
    #[arg(long, short = 'u', env = "ACIKIT_URL", global = true)]
    pub url: Option<String>,

    /// Login name (overrides profile)
    #[arg(long, short = 'l', env = "ACIKIT_LOGIN", global = true)]
    pub login: Option<String>,

    /// Password (overrides profile)
    #[arg(long, env = "ACIKIT_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one DN per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every object of a class
    #[command(alias = "ls")]
    Class(ClassArgs),

    /// Show an object and its subtree
    Show(ShowArgs),

    /// POST a JSON object tree to the controller
    Push(PushArgs),

    /// Stream changes to a class
    Watch(WatchArgs),

    /// Free-text search over a tenant or the whole policy tree
    Search(SearchArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ClassArgs {
    /// Class name (e.g. fvTenant, fvBD)
    pub class_name: String,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Distinguished name (e.g. uni/tn-common)
    pub dn: String,

    /// Only return configurable attributes
    #[arg(long)]
    pub config_only: bool,

    /// Only include direct children
    #[arg(long)]
    pub children: bool,

    /// Restrict the subtree to these classes (repeatable)
    #[arg(long = "class", short = 'c')]
    pub classes: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PushArgs {
    /// JSON file holding one object tree
    pub file: PathBuf,

    /// DN to post under
    #[arg(long, default_value = "uni")]
    pub parent_dn: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Class name to watch
    pub class_name: String,

    /// Skip the objects that already exist
    #[arg(long)]
    pub only_new: bool,

    /// Exit after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Exit when no event arrives for this many seconds
    #[arg(long)]
    pub idle: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// `keyword=value`, `keyword=`, `=value` or bare text
    pub query: String,

    /// Limit the search to one tenant
    #[arg(long, short = 't')]
    pub tenant: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

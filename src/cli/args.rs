use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::RuntimeType;
use crate::language::Language;

#[derive(Parser, Debug)]
#[clap(name = "execbox")]
#[clap(version, about = "Sandboxed multi-language code execution")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "EXECBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a source file in the sandbox
    Run(RunArgs),

    /// List supported languages and their images
    Languages,

    /// Check whether the isolation runtime is available
    Health,

    /// Pull all configured sandbox images
    Pull,

    /// Initialize a new execbox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source file to execute ("-" reads from stdin)
    pub file: PathBuf,

    /// Guest language (inferred from the file extension if omitted)
    #[clap(long, short = 'l', value_enum)]
    pub language: Option<Language>,

    /// Override the configured runtime for this invocation
    #[clap(long, value_enum)]
    pub runtime: Option<RuntimeType>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod ui;
mod version;

use cli::CliHandler;
use version::CURRENT_VERSION;

#[derive(Parser)]
#[command(
    name = "forge3d",
    about = "Generate 3D models from text prompts or images",
    long_about = "forge3d - Text and image to 3D model generation

OVERVIEW:
  Submits generation jobs to the forge3d backend, follows them until the
  model is ready and saves the result as a .glb file.

LIMITS:
  At most 5 submissions per 10 minutes and 3 jobs running at once
  (configurable).

QUICK START:
  forge3d text \"a ceramic mug\"            # Generate from a text prompt
  forge3d image ./chair.png --out models  # Generate from an image
  forge3d backend                         # Show the resolved backend address
  forge3d config show                     # Show current settings",
    version = CURRENT_VERSION,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a model from a text prompt
    #[command(aliases = &["t"])]
    Text(TextArgs),

    /// Generate a model from an image
    #[command(aliases = &["img"])]
    Image(ImageArgs),

    /// Resolve and print the generation backend address
    Backend,

    /// Configure settings
    #[command(aliases = &["cfg"])]
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct OutputArgs {
    /// Directory the finished model is saved to
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Overwrite an existing file without asking
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct TextArgs {
    pub caption: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct ImageArgs {
    pub image_path: PathBuf,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    Show,
    Reset,
    SetTimeout { seconds: u64 },
    SetBackend { url: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(format!("forge3d={}", log_level))
        .with_target(false);
    subscriber.init();

    let mut handler = CliHandler::with_config_path(cli.config);

    if let Err(e) = handler.execute(cli.command).await {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bda-svc")]
#[command(
    author,
    version,
    about = "Automated battle damage assessment powered by a vision-language model"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze an image or a folder of images and export JSON reports
    Analyze(AnalyzeArgs),

    /// Report accelerator availability and build information
    Doctor {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Path to an input image file or folder
    #[arg(short, long, env = "BDA_INPUT", default_value = "data/input")]
    pub input: PathBuf,

    /// Path to the output folder
    #[arg(short, long, env = "BDA_OUTPUT", default_value = "data/output")]
    pub output: PathBuf,

    /// Prompt and model configuration file
    #[arg(long, env = "BDA_CONFIG", default_value = "config/config.yaml")]
    pub config: PathBuf,

    /// Target doctrine file
    #[arg(long, env = "BDA_DOCTRINE", default_value = "config/doctrine.yaml")]
    pub doctrine: PathBuf,

    /// Local model cache root [default: user cache dir]
    #[arg(long, env = "BDA_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    /// Hub revision of the model snapshot [default: the backend's pinned revision]
    #[arg(long, env = "BDA_MODEL_REVISION")]
    pub revision: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

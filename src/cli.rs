use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "artifact-publisher",
    version,
    about = "Publishes build artifacts to cloud blob storage",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Use the strategy selected in configuration
    Auto,
    /// Write blobs with the build's storage credentials
    Direct,
    /// Resumable uploads through URLs signed by the build server
    SignedUrl,
}

impl StrategyArg {
    pub fn use_signed_url(self) -> Option<bool> {
        match self {
            StrategyArg::Auto => None,
            StrategyArg::Direct => Some(false),
            StrategyArg::SignedUrl => Some(true),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    Publish {
        #[arg(
            required = true,
            help = "Files to publish, optionally as FILE=>TARGET_DIR"
        )]
        artifacts: Vec<String>,

        #[arg(long, help = "Blob path prefix (defaults to project/build type/build id)")]
        prefix: Option<String>,

        #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
        strategy: StrategyArg,

        #[arg(long, help = "Print published artifacts as JSON")]
        json: bool,
    },

    #[command(about = "Print the blob path prefix of the current build")]
    Prefix,
}

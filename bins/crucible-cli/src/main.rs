mod commands;
mod templates;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crucible_common::toolchain::DEFAULT_TOOLCHAINS_PATH;
use crucible_common::types::TestType;
use std::path::PathBuf;

use crate::templates::TemplateLang;

#[derive(Parser)]
#[command(name = "crucible-cli")]
#[command(about = "Crucible CLI - Manage toolchains and scaffold test workspaces", long_about = None)]
struct Cli {
    /// Toolchain override file
    #[arg(long, global = true, default_value = DEFAULT_TOOLCHAINS_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a language profile to the toolchain overrides
    AddLang {
        /// Language id (e.g., go, kotlin)
        #[arg(short, long)]
        name: String,

        /// File extensions, comma separated (e.g., go or kt,kts)
        #[arg(short, long, value_delimiter = ',', required = true)]
        ext: Vec<String>,

        /// Compile command template (e.g., "go build -o {output} {source}")
        #[arg(short, long)]
        compile: Option<String>,

        /// Run command template (e.g., "{output}")
        #[arg(short, long)]
        run: String,

        /// Path that proves the artifact exists (defaults to {output}, or {source} when interpreted)
        #[arg(short, long)]
        artifact: Option<String>,
    },

    /// Remove a language profile from the toolchain overrides
    RemoveLang {
        /// Language id
        #[arg(short, long)]
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// List built-in and configured languages
    ListLangs,

    /// Create a workspace with one template source per role
    Init {
        /// Workspace path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Test type the workspace is set up for
        #[arg(short, long)]
        test_type: TestType,

        /// Template language
        #[arg(short, long, value_enum, default_value = "cpp")]
        lang: TemplateLang,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AddLang {
            name,
            ext,
            compile,
            run,
            artifact,
        } => {
            commands::add_language(&cli.config, &name, &ext, compile.as_deref(), &run, artifact.as_deref()).await?;
        }
        Commands::RemoveLang { name, yes } => {
            commands::remove_language(&cli.config, &name, yes).await?;
        }
        Commands::ListLangs => {
            commands::list_languages(&cli.config).await?;
        }
        Commands::Init { path, test_type, lang } => {
            commands::init_project(&path, test_type, lang).await?;
        }
    }

    Ok(())
}

use anyhow::Result;
use clap::{CommandFactory, Parser};
use color_eyre::config::HookBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod handlers;
mod wizard;

/// b2pilot - CLI for Backblaze B2
#[derive(Parser, Debug)]
#[command(name = "b2pilot")]
#[command(author = "Kev <kev@m7academy.com>")]
#[command(version)]
#[command(about = "Rust CLI to upload, download and delete Backblaze B2 files from your terminal", long_about = None)]
struct Cli {
    /// Increase log verbosity (overrides the configured level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Initial setup (interactive wizard)
    Init,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Upload a local file
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Target bucket id (defaults to the configured bucket)
        #[arg(short, long)]
        bucket_id: Option<String>,
        /// Name of the file in the bucket (defaults to the local file name)
        #[arg(short, long)]
        name: Option<String>,
        /// Explicit content type
        #[arg(short, long, conflicts_with = "guess_type")]
        content_type: Option<String>,
        /// Guess the content type from the file extension instead of letting B2 pick it
        #[arg(short, long)]
        guess_type: bool,
    },

    /// Download a file by id
    Download {
        /// B2 file id
        file_id: String,
        /// Local destination
        dest: PathBuf,
    },

    /// Delete one file version
    Delete {
        /// File name in the bucket
        file_name: String,
        /// B2 file id of the version to delete
        file_id: String,
    },

    /// Shell completion
    Completion {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: String,
    },

    /// Diagnostics
    Doctor {
        #[command(subcommand)]
        action: DoctorAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Validate the configuration and credentials
    Validate,
    /// Print the configuration file path
    Path,
}

#[derive(clap::Subcommand, Debug)]
enum DoctorAction {
    /// Check the installation
    Check,
    /// Authorize against B2
    TestConnection,
}

/// Install the tracing subscriber, `RUST_LOG` wins over the configured level
fn init_logging(verbose: bool) {
    let logging = b2pilot_core::load_config()
        .ok()
        .and_then(|config| config.logging)
        .unwrap_or_default();

    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("b2pilot={level},b2pilot_core={level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format.as_str() {
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };
    if let Err(e) = result {
        eprintln!("Warning: Failed to install log subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init => handlers::handle_init().await,
        Commands::Config { action } => {
            let action_str = match action {
                ConfigAction::Show => "show",
                ConfigAction::Validate => "validate",
                ConfigAction::Path => "path",
            };
            handlers::handle_config(action_str).await
        }
        Commands::Upload {
            file,
            bucket_id,
            name,
            content_type,
            guess_type,
        } => {
            let options = handlers::UploadOptions {
                bucket_id,
                name,
                content_type,
                guess_type,
            };
            handlers::handle_upload(&file, options).await
        }
        Commands::Download { file_id, dest } => handlers::handle_download(&file_id, &dest).await,
        Commands::Delete { file_name, file_id } => handlers::handle_delete(&file_name, &file_id).await,
        Commands::Completion { shell } => handlers::handle_completion(&shell, &mut Cli::command()).await,
        Commands::Doctor { action } => {
            let action_str = match action {
                DoctorAction::Check => "check",
                DoctorAction::TestConnection => "test-connection",
            };
            handlers::handle_doctor(action_str).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload_flags() {
        let cli = Cli::try_parse_from([
            "b2pilot",
            "upload",
            "package.json",
            "--bucket-id",
            "bucket-1",
            "--name",
            "t-package.json",
            "--content-type",
            "text/json",
        ])
        .unwrap();

        match cli.command {
            Commands::Upload {
                file,
                bucket_id,
                name,
                content_type,
                guess_type,
            } => {
                assert_eq!(file, PathBuf::from("package.json"));
                assert_eq!(bucket_id.as_deref(), Some("bucket-1"));
                assert_eq!(name.as_deref(), Some("t-package.json"));
                assert_eq!(content_type.as_deref(), Some("text/json"));
                assert!(!guess_type);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_content_type_conflicts_with_guess() {
        let result = Cli::try_parse_from([
            "b2pilot",
            "upload",
            "a.txt",
            "--content-type",
            "text/plain",
            "--guess-type",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_delete_arguments() {
        let cli = Cli::try_parse_from(["b2pilot", "delete", "a.txt", "4_zfile"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Delete { ref file_name, ref file_id } if file_name == "a.txt" && file_id == "4_zfile"
        ));
    }
}

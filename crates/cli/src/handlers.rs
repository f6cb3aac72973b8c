//! Command handlers for b2pilot CLI

use crate::wizard::run_init_wizard;
use anyhow::{Context, Result};
use b2pilot_core::{
    get_config_path, load_config, validate_config, B2Client, ConfigFile, FileRecord, UploadRequest,
};
use clap::Command;
use clap_complete::{generate, Shell as ClapShell};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::debug;

/// Flags of the upload command
#[derive(Debug, Default)]
pub struct UploadOptions {
    pub bucket_id: Option<String>,
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub guess_type: bool,
}

/// Handle init command
pub async fn handle_init() -> Result<()> {
    run_init_wizard().await
}

/// Handle config commands
pub async fn handle_config(action: &str) -> Result<()> {
    match action {
        "show" => {
            let config = load_config()?;
            let advanced = config.advanced.clone().unwrap_or_default();
            let logging = config.logging.clone().unwrap_or_default();

            println!("Current configuration:");
            println!();
            println!("B2:");
            println!("  Account ID: {}", config.b2.account_id);
            println!("  Application key: {}", mask(&config.b2.application_key));
            println!(
                "  Default bucket: {}",
                config.b2.default_bucket_id.as_deref().unwrap_or("(none)")
            );
            println!();
            println!("Advanced:");
            println!("  API version: {}", advanced.api_version);
            println!("  Timeout: {}ms", advanced.timeout_ms);
            println!("  Max retries: {}", advanced.max_retries);
            println!("  Retry delay: {}ms", advanced.retry_delay_ms);
            println!("  Retry non-idempotent: {}", advanced.retry_non_idempotent);
            println!("  Token refresh interval: {}s", advanced.refresh_interval_secs);
            println!("  Verify upload SHA-1: {}", advanced.verify_upload_sha1);
            if let Some(url) = &advanced.auth_url {
                println!("  Authorize URL: {}", url);
            }
            println!();
            println!("Logging:");
            println!("  Level: {}", logging.level);
            println!("  Format: {}", logging.format);

            Ok(())
        }
        "validate" => {
            println!("Validating configuration...");

            let config = load_config()?;
            validate_config(&config)?;
            println!("  ✅ Valid configuration format");

            let client = build_client(&config)?;
            let spinner = spinner("Authorizing account...");
            let auth = client.authorize().await;
            spinner.finish_and_clear();

            let auth = auth.context("B2 rejected the configured credentials")?;
            println!("  ✅ Credentials accepted (API: {})", auth.api_url);

            Ok(())
        }
        "path" => {
            println!("{}", get_config_path()?.display());
            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: show, validate, path");
            Ok(())
        }
    }
}

/// Handle the upload command
pub async fn handle_upload(file: &Path, options: UploadOptions) -> Result<()> {
    let config = load_config()?;

    let bucket_id = options
        .bucket_id
        .clone()
        .or_else(|| config.b2.default_bucket_id.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No bucket id given (use --bucket-id or set default_bucket_id in the configuration)")
        })?;

    let name = remote_name(file, options.name.as_deref())?;
    let content_type = resolve_content_type(file, &options);
    debug!(%bucket_id, %name, ?content_type, "resolved upload target");

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    println!("Uploading {} -> {}...", file.display(), name);
    println!("  Size: {}", format_bytes(bytes.len() as u64));

    let client = build_client(&config)?;

    let spinner = spinner("Requesting upload URL...");
    let target = client.get_upload_url(&bucket_id).await;
    let target = match target {
        Ok(target) => target,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    spinner.set_message(format!("Uploading {}...", name));
    let mut request = UploadRequest::to(&target, bytes, name);
    if let Some(content_type) = content_type {
        request = request.with_content_type(content_type);
    }
    let record = client.upload_file(&request).await;
    spinner.finish_and_clear();

    let record = record?;
    println!("  {} Upload complete", style("✅").green());
    println!();
    println!("{}", Table::new(summary_rows(&record)));

    Ok(())
}

/// Handle the download command
pub async fn handle_download(file_id: &str, dest: &Path) -> Result<()> {
    let config = load_config()?;
    let client = build_client(&config)?;

    println!("Downloading {} -> {}...", file_id, dest.display());

    let spinner = spinner("Downloading...");
    let file = client.download_file_by_id(file_id).await;
    spinner.finish_and_clear();
    let file = file?;

    match file.verify_sha1() {
        Some(true) => println!("  ✅ SHA-1 verified"),
        Some(false) => {
            return Err(anyhow::anyhow!(
                "Downloaded content does not match the SHA-1 reported by B2, nothing written"
            ));
        }
        None => println!("  ⚠️  B2 did not report a SHA-1 for this file"),
    }

    debug!(file_id, len = file.bytes.len(), "writing download");
    tokio::fs::write(dest, &file.bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;

    if let Some(name) = &file.file_name {
        println!("  Name: {}", name);
    }
    if let Some(content_type) = &file.content_type {
        println!("  Content type: {}", content_type);
    }
    println!("  Size: {}", format_bytes(file.bytes.len() as u64));
    println!("  ✅ Download complete");

    Ok(())
}

/// Handle the delete command
pub async fn handle_delete(file_name: &str, file_id: &str) -> Result<()> {
    let config = load_config()?;
    let client = build_client(&config)?;

    println!("⚠️  Deleting version {} of '{}'", file_id, file_name);

    let deleted = client.delete_file_version(file_name, file_id).await?;
    println!("  ✅ Deleted: {} ({})", deleted.file_name, deleted.file_id);

    Ok(())
}

/// Handle doctor commands
pub async fn handle_doctor(action: &str) -> Result<()> {
    match action {
        "check" => {
            println!("Checking b2pilot installation...");

            println!("  ✅ b2pilot is installed");
            println!("  Version: {}", env!("CARGO_PKG_VERSION"));

            let config_path = get_config_path()?;
            if config_path.exists() {
                println!("  ✅ Configuration found: {}", config_path.display());

                let config = load_config()?;
                validate_config(&config)?;
                println!("  ✅ Configuration valid");

                if config.b2.default_bucket_id.is_none() {
                    println!("  ⚠️  No default bucket id, uploads need --bucket-id");
                }
            } else {
                println!("  ⚠️  Configuration not found (run 'b2pilot init')");
            }

            Ok(())
        }
        "test-connection" => {
            println!("Testing B2 connection...");

            let config = load_config()?;
            let client = build_client(&config)?;

            let started = std::time::Instant::now();
            let auth = client.authorize().await?;
            println!("  ✅ Authorized in {}ms", started.elapsed().as_millis());
            println!("  API URL: {}", auth.api_url);
            println!("  Download URL: {}", auth.download_url);
            if let Some(size) = auth.recommended_part_size {
                println!("  Recommended part size: {}", format_bytes(size));
            }

            if let Some(bucket_id) = &config.b2.default_bucket_id {
                client.get_upload_url(bucket_id).await?;
                println!("  ✅ Upload URL obtained for bucket {}", bucket_id);
            }

            println!();
            println!("  ✅ All connections are working!");

            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: check, test-connection");
            Ok(())
        }
    }
}

/// Handle shell completion generation
pub async fn handle_completion(shell: &str, cmd: &mut Command) -> Result<()> {
    let clap_shell = match shell {
        "bash" => ClapShell::Bash,
        "zsh" => ClapShell::Zsh,
        "fish" => ClapShell::Fish,
        "elvish" => ClapShell::Elvish,
        "powershell" | "pwsh" => ClapShell::PowerShell,
        _ => {
            return Err(anyhow::anyhow!(
                "Unsupported shell: {}\nSupported shells: bash, zsh, fish, elvish, powershell",
                shell
            ));
        }
    };

    // Script goes to stdout so it can be sourced directly
    generate(clap_shell, cmd, "b2pilot", &mut std::io::stdout());

    eprintln!();
    eprintln!("Installation instructions:");
    match clap_shell {
        ClapShell::Bash => {
            eprintln!("  # Add to your ~/.bashrc:");
            eprintln!("  source <(b2pilot completion bash)");
        }
        ClapShell::Zsh => {
            eprintln!("  b2pilot completion zsh > ~/.zsh/completion/_b2pilot");
            eprintln!("  # then add to ~/.zshrc:");
            eprintln!("  fpath=(~/.zsh/completion $fpath)");
            eprintln!("  autoload -U compinit && compinit");
        }
        ClapShell::Fish => {
            eprintln!("  b2pilot completion fish > ~/.config/fish/completions/b2pilot.fish");
        }
        ClapShell::Elvish => {
            eprintln!("  b2pilot completion elvish > ~/.elvish/lib/b2pilot.elv");
        }
        _ => {
            eprintln!("  b2pilot completion powershell | Out-String | Invoke-Expression");
        }
    }

    Ok(())
}

fn build_client(config: &ConfigFile) -> Result<B2Client> {
    B2Client::new(config.client_config()).context("Failed to build B2 client (check 'b2pilot config show')")
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Name in the bucket: the explicit one, or the local file name
fn remote_name(file: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("Cannot derive a file name from {}", file.display()))
}

/// `None` leaves the choice to B2 (`b2/x-auto`)
fn resolve_content_type(file: &Path, options: &UploadOptions) -> Option<String> {
    if let Some(content_type) = &options.content_type {
        return Some(content_type.clone());
    }
    if options.guess_type {
        return Some(mime_guess::from_path(file).first_or_octet_stream().to_string());
    }
    None
}

#[derive(Tabled)]
struct SummaryRow {
    field: &'static str,
    value: String,
}

fn summary_rows(record: &FileRecord) -> Vec<SummaryRow> {
    let uploaded = record
        .uploaded_at()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());

    vec![
        SummaryRow { field: "File name", value: record.file_name.clone() },
        SummaryRow { field: "File id", value: record.file_id.clone() },
        SummaryRow { field: "Bucket id", value: record.bucket_id.clone() },
        SummaryRow { field: "Size", value: format_bytes(record.content_length) },
        SummaryRow {
            field: "Content type",
            value: record.content_type.clone().unwrap_or_else(|| "-".to_string()),
        },
        SummaryRow {
            field: "SHA-1",
            value: record.content_sha1.clone().unwrap_or_else(|| "-".to_string()),
        },
        SummaryRow { field: "Uploaded", value: uploaded },
    ]
}

/// Keep the first four characters of a secret
fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

/// Format bytes to human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

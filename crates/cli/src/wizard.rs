//! Interactive setup wizard for b2pilot configuration

use anyhow::Result;
use b2pilot_core::{save_config, AdvancedConfig, B2Client, B2Config, ConfigFile, LoggingConfig};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};

/// Run the interactive setup wizard
pub async fn run_init_wizard() -> Result<()> {
    println!("🚀 Welcome to b2pilot setup!\n");

    println!("This wizard will guide you through the configuration process.");
    println!("You will need:");
    println!("  1. Your B2 account id (or application key id)");
    println!("  2. The matching application key");
    println!("  3. Optionally, the id of the bucket to upload to by default\n");

    let account_id = prompt_account_id()?;
    let application_key = prompt_application_key()?;
    let default_bucket_id = prompt_bucket_id()?;
    let api_version = prompt_api_version()?;

    println!("\n📋 Configuration summary:");
    println!("  Account ID: {}", account_id);
    println!(
        "  Default bucket: {}",
        default_bucket_id.as_deref().unwrap_or("(none)")
    );
    println!("  API version: {}", api_version);

    let config = ConfigFile {
        b2: B2Config {
            account_id,
            application_key,
            default_bucket_id,
        },
        advanced: Some(AdvancedConfig {
            api_version,
            ..AdvancedConfig::default()
        }),
        logging: Some(LoggingConfig::default()),
    };

    let verify = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Check these credentials against B2 now?")
        .default(true)
        .interact()?;

    if verify {
        let client = B2Client::new(config.client_config())?;
        match client.authorize().await {
            Ok(auth) => println!("  ✅ Credentials accepted (API: {})", auth.api_url),
            Err(e) => println!("  ⚠️  Authorization failed: {}", e),
        }
    }

    let confirm = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Save this configuration?")
        .default(false)
        .interact()?;

    if !confirm {
        println!("❌ Configuration cancelled");
        return Ok(());
    }

    let pb = ProgressBar::new(2);
    pb.set_style(
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message("Saving configuration...");

    let path = save_config(&config)?;

    pb.inc(1);
    pb.finish_with_message("✅ Configuration saved!");

    println!("\n🎉 Setup complete!");
    println!("\nConfiguration saved to: {}", path.display());
    println!("\nYou can now use b2pilot:");
    println!("  $ b2pilot doctor test-connection");
    println!("  $ b2pilot upload file.txt --name path/to/file.txt");
    println!("  $ b2pilot config show");

    Ok(())
}

fn prompt_account_id() -> Result<String> {
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("B2 account id / application key id")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Account id cannot be empty")
            } else if !input.chars().all(|c| c.is_ascii_hexdigit()) {
                Err("Account id must be hexadecimal")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .map_err(|e| anyhow::anyhow!("Failed to get account id: {}", e))
}

fn prompt_application_key() -> Result<String> {
    Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Application key")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Application key cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get application key: {}", e))
}

fn prompt_bucket_id() -> Result<Option<String>> {
    let bucket_id: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Default bucket id (leave empty to skip)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| anyhow::anyhow!("Failed to get bucket id: {}", e))?;

    let bucket_id = bucket_id.trim();
    Ok((!bucket_id.is_empty()).then(|| bucket_id.to_string()))
}

fn prompt_api_version() -> Result<String> {
    let versions = ["v2", "v3"];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Native API version")
        .items(&versions)
        .default(0)
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to select API version: {}", e))?;

    Ok(versions[selection].to_string())
}

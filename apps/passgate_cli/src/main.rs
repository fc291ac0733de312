use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use passgate_adapters::configuration;
use passgate_adapters::telemetry;
use passgate_adapters::{
    default_engine, EncryptedCredentialStore, FileConfigRepository, HttpOauthPrecheck,
    OpenerSystemBrowser,
};
use passgate_core::config::Settings;
use passgate_core::entities::{
    CredentialInput, CredentialRecord, GoogleLoginMethod, LoginStage, LoginStatus, LoginStrategy,
};
use passgate_core::ports::{ConfigRepository, OauthPrecheck, StatusCallback};
use passgate_core::use_cases::{AppCore, LoginPorts, LoginRequest};
use tracing::error;
use zeroize::Zeroizing;

mod prompt;

use prompt::{DialoguerMethodPrompt, EnterToContinue};

/// Read instead of prompting when set (also from `.env`).
const MASTER_PASSWORD_ENV: &str = "PASSGATE_MASTER_PASSWORD";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // --- Record commands ---
    /// Add a site or update its stored credentials
    Add {
        /// Site identifier, e.g. example.com
        site: String,

        #[arg(short, long)]
        username: String,

        /// Site offers a bonus worth logging in for
        #[arg(long, default_value = "false")]
        bonus: bool,

        #[arg(long, default_value = "")]
        notes: String,

        /// Pin a login strategy (form, google_oauth, system_browser_handoff)
        #[arg(long)]
        strategy: Option<LoginStrategy>,

        /// Site signs in through Google
        #[arg(long, default_value = "false")]
        google: bool,
    },

    /// Remove a site
    Remove { site: String },

    /// List stored sites
    List {
        /// Print JSON instead of a table (passwords are never printed)
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List sites flagged with a bonus
    Bonus,

    /// Replace a site's password
    ChangePassword {
        site: String,

        /// Also pin a new login strategy
        #[arg(long)]
        strategy: Option<LoginStrategy>,
    },

    /// Re-encrypt the store under a new master password
    RotateMaster,

    // --- Login commands ---
    /// Log into a stored site
    Login {
        site: String,

        /// How to handle Google sign-in (automation, system_browser)
        #[arg(short, long)]
        method: Option<GoogleLoginMethod>,

        /// Always ask how to log in
        #[arg(long, default_value = "false")]
        force_prompt: bool,
    },

    /// Log into every bonus site in turn
    LoginBonus,

    // --- Configuration ---
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective settings
    Show,
    /// Write the effective settings to the user config file
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

fn data_dir(settings: &Settings) -> PathBuf {
    settings
        .storage
        .data_dir
        .clone()
        .unwrap_or_else(configuration::default_data_dir)
}

fn prompt_secret(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    Ok(Zeroizing::new(rpassword::prompt_password(prompt)?))
}

fn prompt_new_secret(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    let first = prompt_secret(prompt)?;
    let second = prompt_secret("Repeat: ")?;
    if *first != *second {
        bail!("entries do not match");
    }
    Ok(first)
}

fn master_password(first_run: bool) -> anyhow::Result<Zeroizing<String>> {
    if let Ok(password) = std::env::var(MASTER_PASSWORD_ENV) {
        return Ok(Zeroizing::new(password));
    }
    if first_run {
        println!("No credential store yet; choose a master password.");
        prompt_new_secret("New master password: ")
    } else {
        prompt_secret("Master password: ")
    }
}

fn print_record(record: &CredentialRecord) {
    let last = match &record.last_login {
        Some(last) => format!(
            "{} at {}",
            if last.success { "ok" } else { "failed" },
            last.timestamp
        ),
        None => "never".to_string(),
    };
    let strategy = record
        .login_strategy
        .map(|s| s.to_string())
        .unwrap_or_else(|| "auto".to_string());
    println!(
        "- {} ({}) strategy={}{}{} last login: {}",
        record.site,
        record.username,
        strategy,
        if record.google_login { " google" } else { "" },
        if record.has_bonus { " bonus" } else { "" },
        last
    );
    if !record.notes.is_empty() {
        println!("    {}", record.notes);
    }
}

fn progress_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        bar.set_style(style);
    }
    bar
}

/// Spinner updates for each stage; verification stages wait for Enter.
fn status_callback(progress: ProgressBar, enter: Arc<EnterToContinue>) -> StatusCallback {
    Arc::new(move |status: &LoginStatus| {
        if status.is_final() {
            return;
        }
        progress.enable_steady_tick(Duration::from_millis(100));
        progress.set_message(format!("[{}] {}", status.stage, status.message));
        if status.stage == LoginStage::AwaitingVerification {
            progress.println(format!("{} (press Enter to continue)", status.message));
            enter.arm();
        }
    })
}

async fn run_login(
    app: &AppCore<EncryptedCredentialStore>,
    site: &str,
    callback: StatusCallback,
    progress: &ProgressBar,
    request: LoginRequest,
) -> anyhow::Result<bool> {
    let status = app
        .login_to_website_async(site, Some(callback), request)
        .await;
    progress.finish_and_clear();

    let status = status.with_context(|| format!("cannot log into {}", site))?;
    if status.is_success() {
        println!("{}: {}", status.site, status.message);
    } else {
        println!("{}: login failed at {}: {}", status.site, status.stage, status.message);
    }
    Ok(status.is_success())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = match configuration::get_configuration() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return Err(anyhow!("configuration loading failed"));
        }
    };
    settings.validate()?;

    let _guard = telemetry::init_subscriber("passgate", &settings.log_level)?;

    let cli = Cli::parse();

    if let Commands::Config(command) = &cli.command {
        let repository = FileConfigRepository::new(configuration::system_config_dir());
        match command {
            ConfigCommand::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
                println!("data dir: {}", data_dir(&settings).display());
                println!("config file: {}", repository.config_path().display());
            }
            ConfigCommand::Init { force } => {
                if repository.exists().await && !force {
                    bail!(
                        "{} already exists (use --force to overwrite)",
                        repository.config_path().display()
                    );
                }
                repository.save_settings(&settings).await?;
                println!("Wrote {}", repository.config_path().display());
            }
        }
        return Ok(());
    }

    let store = EncryptedCredentialStore::new(data_dir(&settings))
        .with_kdf_iterations(settings.storage.kdf_iterations);
    let first_run = !store.store_path().exists();

    let progress = progress_spinner();
    let precheck: Option<Arc<dyn OauthPrecheck>> = if settings.login.precheck_google_oauth {
        Some(Arc::new(HttpOauthPrecheck::new()?))
    } else {
        None
    };
    let ports = LoginPorts {
        engine: default_engine(),
        system_browser: Arc::new(OpenerSystemBrowser),
        precheck,
        prompt: Some(Arc::new(DialoguerMethodPrompt::new(progress.clone()))),
    };
    let app = AppCore::new(store, ports, &settings);

    let password = master_password(first_run)?;
    if !app.initialize_async(&password).await {
        error!("failed to unlock the credential store");
        bail!("could not unlock the credential store (wrong master password?)");
    }
    drop(password);

    let enter = Arc::new(EnterToContinue::new(app.user_actions()));
    let result = run(&app, cli.command, &progress, &enter).await;
    app.close_async().await;
    result
}

async fn run(
    app: &AppCore<EncryptedCredentialStore>,
    command: Commands,
    progress: &ProgressBar,
    enter: &Arc<EnterToContinue>,
) -> anyhow::Result<()> {
    match command {
        Commands::Add {
            site,
            username,
            bonus,
            notes,
            strategy,
            google,
        } => {
            let password = prompt_secret(&format!("Password for {} at {}: ", username, site))?;
            let mut input = CredentialInput::new(&site, &username, &password)
                .with_bonus(bonus)
                .with_notes(&notes)
                .with_google_login(google);
            if let Some(strategy) = strategy {
                input = input.with_strategy(strategy);
            }
            let record = app.add_or_update(input)?;
            println!("Saved {}", record.site);
        }
        Commands::Remove { site } => {
            let confirmed = Confirm::new()
                .with_prompt(format!("Remove {}?", site))
                .default(false)
                .interact()?;
            if confirmed {
                app.remove(&site)?;
                println!("Removed {}", site);
            }
        }
        Commands::List { json } => {
            let records = app.get_all()?;
            if json {
                let listing: Vec<_> = records
                    .values()
                    .map(|r| {
                        serde_json::json!({
                            "site": r.site,
                            "username": r.username,
                            "has_bonus": r.has_bonus,
                            "notes": r.notes,
                            "login_strategy": r.login_strategy,
                            "google_login": r.google_login,
                            "last_login": r.last_login,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else if records.is_empty() {
                println!("No sites stored.");
            } else {
                println!("{} sites:", records.len());
                records.values().for_each(print_record);
            }
        }
        Commands::Bonus => {
            let records = app.get_bonus_sites()?;
            if records.is_empty() {
                println!("No bonus sites.");
            } else {
                records.values().for_each(print_record);
            }
        }
        Commands::ChangePassword { site, strategy } => {
            let password = prompt_new_secret(&format!("New password for {}: ", site))?;
            app.change_password(&site, &password, strategy)?;
            println!("Password updated for {}", site);
        }
        Commands::RotateMaster => {
            let password = prompt_new_secret("New master password: ")?;
            app.rotate_master_password(&password)?;
            println!("Master password changed.");
        }
        Commands::Login {
            site,
            method,
            force_prompt,
        } => {
            let request = LoginRequest {
                google_login_method: method,
                force_prompt,
            };
            let callback = status_callback(progress.clone(), enter.clone());
            if !run_login(app, &site, callback, progress, request).await? {
                bail!("login to {} failed", site);
            }
        }
        Commands::LoginBonus => {
            let sites: Vec<String> = app
                .get_bonus_sites()?
                .keys()
                .map(|s| s.to_string())
                .collect();
            let mut failed = 0;
            for site in &sites {
                let bar = progress_spinner();
                let callback = status_callback(bar.clone(), enter.clone());
                match run_login(app, site, callback, &bar, LoginRequest::default()).await {
                    Ok(true) => {}
                    Ok(false) => failed += 1,
                    Err(e) => {
                        failed += 1;
                        println!("{:#}", e);
                    }
                }
            }
            println!("{} of {} bonus logins succeeded", sites.len() - failed, sites.len());
        }
        Commands::Config(_) => unreachable!("handled before the store is opened"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_login_parses_method_and_prompt_flag() {
        let cli = Cli::try_parse_from([
            "passgate",
            "login",
            "example.com",
            "--method",
            "automation",
            "--force-prompt",
        ])
        .unwrap();
        match cli.command {
            Commands::Login {
                site,
                method,
                force_prompt,
            } => {
                assert_eq!(site, "example.com");
                assert_eq!(method, Some(GoogleLoginMethod::Automation));
                assert!(force_prompt);
            }
            _ => panic!("expected login"),
        }
    }

    #[rstest]
    #[case("form", LoginStrategy::Form)]
    #[case("google", LoginStrategy::GoogleOauth)]
    #[case("system_browser_handoff", LoginStrategy::SystemBrowserHandoff)]
    fn test_add_parses_strategy(#[case] raw: &str, #[case] expected: LoginStrategy) {
        let cli = Cli::try_parse_from([
            "passgate",
            "add",
            "example.com",
            "--username",
            "alice",
            "--strategy",
            raw,
        ])
        .unwrap();
        match cli.command {
            Commands::Add { strategy, .. } => assert_eq!(strategy, Some(expected)),
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let parsed = Cli::try_parse_from([
            "passgate",
            "add",
            "example.com",
            "--username",
            "alice",
            "--strategy",
            "carrier_pigeon",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_data_dir_prefers_configured_path() {
        let mut settings = Settings::default();
        settings.storage.data_dir = Some(PathBuf::from("/tmp/passgate-test"));
        assert_eq!(data_dir(&settings), PathBuf::from("/tmp/passgate-test"));
    }
}

//! authrelay - command-line client for an authrelay-backed service.
//!
//! Logs in once, keeps the credential in the configured slot, and runs
//! requests through the renewing client so an expired access token is
//! refreshed transparently.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use authrelay_core::api::ApiError;
use authrelay_core::auth::KeyringSlot;
use authrelay_core::utils::{format_optional, truncate_string};
use authrelay_core::{
    ApiClient, AuthService, Config, CredentialSlot, CredentialStore, RolesApi, UsersApi,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Keychain service holding remembered login passwords, keyed by username.
const PASSWORD_SERVICE: &str = "authrelay-login";

const USAGE: &str = "\
Usage: authrelay <command> [args]

Commands:
  login [username] [--remember]   Log in (prompts for missing values)
  logout [--forget]               End the session
  whoami                          Show the current account
  users                           List accounts
  roles                           List roles
  my-roles                        List roles held by the current account
  get <path>                      GET a path and print the JSON response

Environment:
  AUTHRELAY_BASE_URL, AUTHRELAY_USERNAME, AUTHRELAY_PASSWORD,
  AUTHRELAY_PASSPHRASE, RUST_LOG";

/// Initialize the tracing subscriber for logging.
///
/// Always logs to stderr; also writes a daily rolling file when a log
/// directory is available. The returned guard must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "authrelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env();

    let log_dir = config.cache_dir().ok().map(|dir| dir.join("logs"));
    let _guard = init_tracing(log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let passphrase = env_nonempty("AUTHRELAY_PASSPHRASE");
    let slot = config
        .credential_slot(passphrase.as_deref())
        .context("Failed to open credential storage")?;
    let store = Arc::new(CredentialStore::load(slot));
    let client = ApiClient::from_config(&config, store).context("Failed to build HTTP client")?;
    info!(base_url = %config.base_url, command, "authrelay starting");

    match command {
        "login" => login(&config, client, rest).await,
        "logout" => logout(&config, client, rest).await,
        "whoami" => whoami(&config, client).await,
        "users" => list_users(&config, client).await,
        "roles" => list_roles(&config, client).await,
        "my-roles" => list_my_roles(&config, client).await,
        "get" => {
            let Some(path) = rest.first() else {
                bail!("Usage: authrelay get <path>");
            };
            get_path(client, path).await
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(config: &Config, client: ApiClient, args: &[String]) -> Result<()> {
    let remember = args.iter().any(|a| a == "--remember");
    let username = match args.iter().find(|a| !a.starts_with("--")) {
        Some(name) => name.clone(),
        None => match env_nonempty("AUTHRELAY_USERNAME").or_else(|| config.last_username.clone()) {
            Some(name) => name,
            None => prompt_line("Username: ")?,
        },
    };
    if username.is_empty() {
        bail!("A username is required");
    }

    let keychain = KeyringSlot::new(PASSWORD_SERVICE);
    let remembered = match keychain.load(&username) {
        Ok(password) => password,
        Err(e) => {
            warn!(error = %e, "Could not read remembered password");
            None
        }
    };
    let from_keychain = remembered.is_some();
    let password = match env_nonempty("AUTHRELAY_PASSWORD").or(remembered) {
        Some(password) => password,
        None => rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?,
    };

    let auth = AuthService::new(client, config.endpoints.clone());
    let user = match auth.login(&username, &password).await {
        Ok(user) => user,
        Err(e) => {
            if from_keychain && matches!(e, ApiError::Auth { .. }) {
                // Stale remembered password; ask next time.
                if let Err(err) = keychain.remove(&username) {
                    warn!(error = %err, "Could not forget remembered password");
                }
            }
            return Err(e).context("Login failed");
        }
    };

    if remember {
        keychain
            .save(&username, &password)
            .context("Failed to remember password in keychain")?;
    }

    // Persist only the username; env overrides stay out of the file.
    let saved = Config::load().and_then(|mut stored| {
        stored.last_username = Some(username);
        stored.save()
    });
    if let Err(e) = saved {
        warn!(error = %e, "Could not save config");
    }

    println!("Logged in as {}", user.display_name());
    Ok(())
}

async fn logout(config: &Config, client: ApiClient, args: &[String]) -> Result<()> {
    let auth = AuthService::new(client, config.endpoints.clone());
    let result = auth.logout().await;

    if args.iter().any(|a| a == "--forget") {
        if let Some(ref username) = config.last_username {
            KeyringSlot::new(PASSWORD_SERVICE)
                .remove(username)
                .context("Failed to forget remembered password")?;
        }
    }

    result.context("Server-side logout failed (local session was cleared)")?;
    println!("Logged out");
    Ok(())
}

async fn whoami(config: &Config, client: ApiClient) -> Result<()> {
    if !client.credentials().is_present() {
        bail!("Not logged in. Run `authrelay login` first.");
    }
    let auth = AuthService::new(client, config.endpoints.clone());
    let user = auth
        .get_user_info()
        .await
        .context("Failed to fetch account info")?;

    println!("{}", user.display_name());
    println!("  id:         {}", user.id);
    println!(
        "  active:     {}",
        user.is_active.map_or("unknown", |a| if a { "yes" } else { "no" })
    );
    println!("  last login: {}", user.last_login_display());
    Ok(())
}

async fn list_users(config: &Config, client: ApiClient) -> Result<()> {
    let users = UsersApi::new(client, config.endpoints.clone())
        .list()
        .await
        .context("Failed to list users")?;

    for user in &users {
        println!(
            "{:>6}  {:<24} {}",
            user.id,
            truncate_string(&user.username, 24),
            format_optional(&user.email, "-")
        );
    }
    eprintln!("{} user(s)", users.len());
    Ok(())
}

async fn list_roles(config: &Config, client: ApiClient) -> Result<()> {
    let roles = RolesApi::new(client, config.endpoints.clone())
        .list()
        .await
        .context("Failed to list roles")?;

    for role in &roles {
        println!(
            "{:>6}  {:<24} {}",
            role.id,
            truncate_string(&role.name, 24),
            truncate_string(&format_optional(&role.description, ""), 60)
        );
    }
    Ok(())
}

async fn list_my_roles(config: &Config, client: ApiClient) -> Result<()> {
    let roles = RolesApi::new(client, config.endpoints.clone())
        .mine()
        .await
        .context("Failed to list your roles")?;

    if roles.is_empty() {
        println!("No roles assigned");
    }
    for role in &roles {
        let since = role
            .assigned_at
            .map(|ts| ts.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!("{:<24} {}", role.name, since);
    }
    Ok(())
}

async fn get_path(client: ApiClient, path: &str) -> Result<()> {
    let value: serde_json::Value = client
        .get_json(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

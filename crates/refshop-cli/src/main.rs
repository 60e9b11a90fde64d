//! refshop - command-line host for the refshop session client.
//!
//! Restores the persisted session, runs one command against the API, and
//! persists whatever credentials the command left behind.

mod host;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use refshop_core::api::Registration;
use refshop_core::auth::TokenClaims;
use refshop_core::config::PROFILE_PATH;
use refshop_core::utils::format_timestamp;
use refshop_core::{Config, SessionClient};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use host::Host;

/// Environment variable naming a directory for log files
const LOG_DIR_ENV: &str = "REFSHOP_LOG_DIR";

/// Upper bound for `burst`, to keep demo traffic polite
const MAX_BURST: usize = 50;

const USAGE: &str = "\
Usage: refshop [--ephemeral] <command>

Options:
  --ephemeral    Keep credentials in memory only for this run

Commands:
  login [email|phone]                          Log in and store credentials
  register <username> <email> <phone> [code]   Create an account and log in
  logout                                       Forget stored credentials
  status                                       Show the current session
  get <path>                                   GET a protected endpoint
  burst <path> <n>                             Fire n concurrent GETs at <path>";

enum Command {
    Login(Option<String>),
    Register(Registration),
    Logout,
    Status,
    Get(String),
    Burst(String, usize),
}

/// Split global flags from the command words
fn split_flags(args: Vec<String>) -> (bool, Vec<String>) {
    let ephemeral = args.iter().any(|a| a == "--ephemeral");
    let rest = args.into_iter().filter(|a| a != "--ephemeral").collect();
    (ephemeral, rest)
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let command = match args {
            [cmd] if cmd == "login" => Command::Login(None),
            [cmd, id] if cmd == "login" => Command::Login(Some(id.clone())),
            [cmd, username, email, phone, rest @ ..] if cmd == "register" && rest.len() <= 1 => {
                Command::Register(Registration {
                    username: username.clone(),
                    email: email.clone(),
                    phone_number: phone.clone(),
                    password: String::new(),
                    referred_by: rest.first().cloned(),
                })
            }
            [cmd] if cmd == "logout" => Command::Logout,
            [cmd] if cmd == "status" => Command::Status,
            [cmd, path] if cmd == "get" => Command::Get(path.clone()),
            [cmd, path, n] if cmd == "burst" => {
                let n: usize = n.parse().with_context(|| format!("Invalid request count: {}", n))?;
                if n == 0 || n > MAX_BURST {
                    bail!("Request count must be between 1 and {}", MAX_BURST);
                }
                Command::Burst(path.clone(), n)
            }
            _ => bail!("{}", USAGE),
        };
        Ok(command)
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). When
/// `REFSHOP_LOG_DIR` is set a daily-rotated file receives the same events.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), "refshop.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let (ephemeral, args) = split_flags(std::env::args().skip(1).collect());
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let mut config = Config::load()?;
    let host = Host::new(&config, ephemeral)?;
    info!(base_url = %host.client.config().base_url, "refshop starting");

    run(command, &host, &mut config).await
}

async fn run(command: Command, host: &Host, config: &mut Config) -> Result<()> {
    let client = &host.client;

    match command {
        Command::Login(identifier) => {
            client.set_location("/login");
            let identifier = match identifier.or_else(|| config.last_identifier.clone()) {
                Some(id) => id,
                None => prompt("Email or phone: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;

            let claims = client.login(&identifier, &password).await?;
            config.last_identifier = Some(identifier.trim().to_string());
            config.save()?;

            match claims.username {
                Some(name) => println!("Logged in as {}", name),
                None => println!("Logged in"),
            }
            show_profile(client).await;
        }
        Command::Register(mut registration) => {
            client.set_location("/signup");
            registration.password = rpassword::prompt_password("Choose a password: ")?;

            let user = client.register(&registration).await?;
            config.last_identifier = Some(registration.email.trim().to_string());
            config.save()?;

            println!("Account created");
            if let Some(code) = user.referral_code {
                println!("Your referral code: {}", code);
            }
        }
        Command::Logout => {
            client.logout();
            println!("Logged out");
        }
        Command::Status => print_status(host),
        Command::Get(path) => {
            let body: serde_json::Value = client.get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Burst(path, n) => {
            let calls = (0..n).map(|_| client.get::<serde_json::Value>(&path));
            let results = join_all(calls).await;

            let ok = results.iter().filter(|r| r.is_ok()).count();
            println!("{} of {} requests succeeded", ok, n);
            for err in results.iter().filter_map(|r| r.as_ref().err()) {
                println!("  error: {}", err);
            }
            let status = client.status();
            println!("Session state after burst: {:?}", status.state);
        }
    }
    Ok(())
}

/// Fetch the profile with the fresh credential; failure only costs the printout
async fn show_profile(client: &SessionClient) {
    client.set_location("/");
    match client.get::<serde_json::Value>(PROFILE_PATH).await {
        Ok(profile) => {
            for field in ["username", "email", "phone_number", "referral_code"] {
                if let Some(value) = profile.get(field).and_then(|v| v.as_str()) {
                    println!("  {:<14}{}", format!("{}:", field), value);
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not load profile"),
    }
}

fn print_status(host: &Host) {
    let status = host.client.status();
    println!("Storage:        {}", host.storage_label);
    println!("Active:         {}", status.active);
    println!("State:          {:?}", status.state);
    println!("Access token:   {}", if status.has_access { "present" } else { "absent" });
    println!("Renewal token:  {}", if status.has_renewal { "present" } else { "absent" });
    println!("Issued:         {}", format_timestamp(status.issued_at));
    println!("Last renewed:   {}", format_timestamp(status.renewed_at));
    if let Some(claims) = &status.claims {
        for line in claim_lines(claims) {
            println!("{}", line);
        }
    }
    if status.degraded_storage {
        println!("Warning: credential storage unavailable, session will not persist");
    }
}

fn claim_lines(claims: &TokenClaims) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(user) = claims.username.as_deref().or(claims.email.as_deref()) {
        lines.push(format!("User:           {}", user));
    }
    // Informational only; the server decides when a credential expires
    lines.push(format!("Token expiry:   {}", format_timestamp(claims.expires_at())));
    lines
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

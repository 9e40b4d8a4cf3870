//! gymbook - a small command-line client for the gym booking service.
//!
//! Browse the class schedule, reserve and cancel spots, and list upcoming
//! bookings. All calls go through the gymbook-core request pipeline.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gymbook_core::auth::{EncryptedFileStorage, KeyringStorage, SecureStorage};
use gymbook_core::{Config, GymClient, StorageBackend};

const USAGE: &str = "\
Usage: gymbook <command>

Commands:
  login [email]          Sign in (prompts for password)
  logout                 Sign out and forget stored credentials
  whoami                 Validate the stored session and show the member
  classes                List scheduled classes
  bookings               List upcoming bookings
  reserve <class-id>     Reserve a spot in a class
  cancel <booking-id>    Cancel a booking";

/// Environment variable holding the passphrase for the encrypted file store
const ENV_PASSPHRASE: &str = "GYMBOOK_PASSPHRASE";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=gymbook_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

fn open_storage(config: &Config) -> Result<Arc<dyn SecureStorage>> {
    match config.storage {
        StorageBackend::Keyring => Ok(Arc::new(KeyringStorage::new())),
        StorageBackend::EncryptedFile => {
            let passphrase = match std::env::var(ENV_PASSPHRASE) {
                Ok(value) if !value.is_empty() => value,
                _ => rpassword::prompt_password("Storage passphrase: ")
                    .context("Failed to read passphrase")?,
            };
            let storage = EncryptedFileStorage::open(config.credential_file()?, &passphrase)?;
            Ok(Arc::new(storage))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load()?;
    let storage = open_storage(&config)?;
    let client = GymClient::new(config.pipeline(), storage)?;
    info!(command, base_url = %config.base_url, "gymbook starting");

    match command {
        "login" => {
            let email = match args.get(1).or(config.last_email.as_ref()) {
                Some(email) => email.clone(),
                None => prompt("Email: ")?,
            };
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;
            let session = client
                .session()
                .login(&email, &password)
                .await
                .context("Login failed")?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            let name = session
                .user
                .as_ref()
                .map(|u| u.display_name().to_string())
                .unwrap_or_default();
            println!("Signed in as {}", name);
        }
        "logout" => {
            client.pipeline().store().load();
            client.session().logout().await;
            println!("Signed out");
        }
        "whoami" => {
            let session = client.session().restore_session().await;
            match session.user {
                Some(user) if session.is_authenticated => {
                    println!("{} <{}>", user.display_name(), user.email)
                }
                _ if session.is_authenticated => println!("Signed in"),
                _ => println!("Not signed in"),
            }
        }
        "classes" => {
            require_credential(&client)?;
            let mut classes = client.list_classes().await?;
            classes.sort_by_key(|c| c.starts_at);
            for class in classes {
                println!(
                    "{:<12} {}  {:<24} {:>3} spots{}",
                    class.id,
                    class.starts_at.with_timezone(&Local).format("%a %d %b %H:%M"),
                    class.name,
                    class.spots_left(),
                    class
                        .instructor
                        .as_deref()
                        .map(|i| format!("  with {}", i))
                        .unwrap_or_default(),
                );
            }
        }
        "bookings" => {
            require_credential(&client)?;
            let now = Utc::now();
            let bookings = client.list_bookings().await?;
            let upcoming: Vec<_> = bookings.iter().filter(|b| b.is_upcoming(now)).collect();
            if upcoming.is_empty() {
                println!("No upcoming bookings");
            }
            for booking in upcoming {
                println!(
                    "{:<12} {:<24} {:?}",
                    booking.id,
                    booking.class_name.as_deref().unwrap_or(&booking.class_id),
                    booking.status,
                );
            }
        }
        "reserve" => {
            let class_id = args.get(1).context("reserve needs a class id")?;
            require_credential(&client)?;
            let booking = client.reserve_class(class_id).await?;
            println!("Reserved: booking {} ({:?})", booking.id, booking.status);
        }
        "cancel" => {
            let booking_id = args.get(1).context("cancel needs a booking id")?;
            require_credential(&client)?;
            client.cancel_booking(booking_id).await?;
            println!("Cancelled booking {}", booking_id);
        }
        other => {
            bail!("Unknown command: {}\n\n{}", other, USAGE);
        }
    }

    Ok(())
}

/// Load the stored credential; the pipeline refreshes it on demand.
fn require_credential(client: &GymClient) -> Result<()> {
    if client.pipeline().store().load().is_none() {
        bail!("Not signed in. Run `gymbook login <email>` first.");
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("No input given");
    }
    Ok(line)
}

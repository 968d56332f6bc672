//! Storefront vendor CLI - a small command-line front end for the vendor
//! session library.
//!
//! Logs in, inspects the stored session, fetches orders, products and the
//! vendor profile, and runs an interactive chat on the realtime channel.

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use storefront_core::models::{Contact, ParticipantRole};
use storefront_core::realtime::{RealtimeSession, SessionEvent};
use storefront_core::{ApiError, Config, SessionContext};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: storefront <command>

Commands:
  login <email>        Log in and store the session
  logout               Clear the stored session
  status               Show whether a session is active and when it expires
  orders               List current orders
  products             List products
  profile              Show the vendor profile
  chat [contact_id]    Open the chat; type a line to send it
";

/// Log file name prefix inside the log directory
const LOG_FILE_PREFIX: &str = "storefront.log";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=storefront_core=debug).
/// Logs go to stderr and, when the log directory is writable, to a daily
/// file as well.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    let file = log_dir
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX)));

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().context("Failed to load configuration")?;
    let _guard = init_tracing(config.log_dir().ok().as_deref());
    info!("Storefront CLI starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let ctx = SessionContext::from_config(&config)?;

    let result = match command.as_str() {
        "login" => {
            let email = args
                .get(1)
                .cloned()
                .or_else(|| config.last_email.clone())
                .context("Usage: storefront login <email>")?;
            login(&ctx, &mut config, &email).await
        }
        "logout" => {
            ctx.api().logout();
            println!("Logged out");
            Ok(())
        }
        "status" => {
            status(&ctx);
            Ok(())
        }
        "orders" => print_data(ctx.api().orders().await),
        "products" => print_data(ctx.api().products().await),
        "profile" => print_data(ctx.api().profile().await),
        "chat" => chat(&ctx, &config, args.get(1).map(String::as_str)).await,
        "-h" | "--help" | "help" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => {
            eprint!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    };

    if let Err(ref e) = result {
        if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_session_ended) {
            eprintln!("Session ended - run `storefront login` again");
        }
    }
    info!("Storefront CLI shutting down");
    result
}

async fn login(ctx: &SessionContext, config: &mut Config, email: &str) -> Result<()> {
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    let vendor = ctx.api().login(email, &password).await?;
    match vendor {
        Some(vendor) => println!("Logged in as {}", vendor.display_name()),
        None => println!("Logged in as {}", email),
    }

    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

fn status(ctx: &SessionContext) {
    if !ctx.credentials().has_access_token() {
        println!("Not logged in");
        return;
    }
    match ctx.tokens().minutes_until_expiry() {
        Some(minutes) if minutes > 0 => println!("Logged in, token expires in {} min", minutes),
        Some(_) => println!("Logged in, token expired (will refresh on next request)"),
        None => println!("Logged in, token expiry unknown"),
    }
}

fn print_data(result: Result<storefront_core::models::ApiEnvelope>) -> Result<()> {
    let envelope = result?;
    if let Some(message) = envelope.message.as_deref() {
        println!("{}", message);
    }
    if !envelope.success {
        bail!("Server reported failure");
    }
    println!("{}", serde_json::to_string_pretty(&envelope.data)?);
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("-- connection {:?}", state),
        SessionEvent::ContactsReplaced(contacts) => {
            println!("-- {} contacts", contacts.len());
            for contact in contacts {
                println!("   {}  {}", contact.id, contact.name);
            }
        }
        SessionEvent::ConversationReplaced(messages) => {
            for message in messages {
                println!("[{}] {}: {}", message.timestamp, message.sender_type, message.content);
            }
        }
        SessionEvent::MessageAppended(message) => {
            println!("[{}] {}: {}", message.timestamp, message.sender_type, message.content);
        }
        SessionEvent::ServerError(error) => eprintln!("!! server: {}", error),
        SessionEvent::TransportError(error) => eprintln!("!! connection: {}", error),
    }
}

async fn chat(ctx: &SessionContext, config: &Config, contact_id: Option<&str>) -> Result<()> {
    if !ctx.credentials().has_access_token() {
        bail!("Not logged in");
    }

    let tokens = ctx.tokens().clone();
    if tokens.is_expired() {
        tokens.refresh().await.context("Session expired")?;
    }
    tokens.schedule_expiry_warning(config.expiry_warning_lead(), || {
        eprintln!("!! session expires soon - log in again to keep chatting");
    });
    tokens.schedule_auto_logout();

    let mut session: RealtimeSession = ctx.realtime(ParticipantRole::Vendor);
    session.set_own_id(tokens.subject_id());
    let mut events = session.subscribe();
    session
        .connect_with(ctx.credentials(), ParticipantRole::Vendor)
        .await?;

    if let Some(id) = contact_id {
        session.select_contact(Contact::new(id, id))?;
    }
    println!("Commands: /contacts, /select <id>, /quit. Anything else is sent to the selected contact.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Chat output fell behind");
                }
                Err(_) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if !ctx.credentials().has_access_token() {
                    eprintln!("Session ended - run `storefront login` again");
                    break;
                }
                if let Err(e) = handle_chat_line(&session, line) {
                    eprintln!("!! {}", e);
                }
            }
        }
    }

    session.close().await;
    tokens.cancel_scheduled();
    Ok(())
}

fn handle_chat_line(session: &RealtimeSession, line: &str) -> Result<()> {
    if line == "/contacts" {
        for contact in session.contacts() {
            println!("   {}  {}", contact.id, contact.name);
        }
        return Ok(());
    }
    if let Some(id) = line.strip_prefix("/select ") {
        let id = id.trim();
        let contact = session
            .contacts()
            .into_iter()
            .find(|c| c.id == id)
            .unwrap_or_else(|| Contact::new(id, id));
        session.select_contact(contact)?;
        return Ok(());
    }

    let Some(contact) = session.selected_contact() else {
        bail!("No contact selected - use /select <id>");
    };
    session.send_message(&contact.id, ParticipantRole::User.as_str(), line)?;
    Ok(())
}

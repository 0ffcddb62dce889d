//! lyncbot CLI - talk to Lync / Skype for Business from the terminal.
//!
//! This is the main binary entry point. See the `lyncbot` library for the
//! core functionality.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lyncbot::{Config, Conversation, Session};

// CLI
#[derive(Parser)]
#[command(name = "lyncbot")]
#[command(version)]
#[command(about = "Lync / Skype for Business UCWA client")]
struct Cli {
    /// Sign-in address, e.g. alice@example.com
    #[arg(long, short, env = "UCWA_USERNAME", global = true)]
    username: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List contacts, optionally those whose name or address contains QUERY
    Contacts {
        /// Name fragment
        query: Option<String>,
    },
    /// Search the directory
    Search {
        /// Name or address to search for
        query: String,
    },
    /// Send one message to a contact
    Chat {
        /// Name fragment resolving to exactly one contact
        contact: String,
        /// Message text
        message: String,
    },
    /// Go online and print incoming messages until interrupted
    Listen,
    /// Print the effective configuration
    Config,
}

fn login(cli: &Cli, config: &Config) -> Result<Session> {
    let username = cli
        .username
        .as_deref()
        .context("No username given (use --username or UCWA_USERNAME)")?;
    let password = std::env::var("UCWA_PASSWORD").context("UCWA_PASSWORD is not set")?;
    Session::login(config, username, &password).with_context(|| format!("Login as {username} failed"))
}

fn print_contacts(contacts: &[lyncbot::Contact]) -> Result<()> {
    for contact in contacts {
        println!("{}", contact.summary()?);
    }
    Ok(())
}

/// Accepts every incoming invitation and prints what arrives on it.
///
/// The returned list owns the accepted conversations; the registered
/// callback only holds a weak handle to it.
fn keep_accepted(session: &Session) -> Arc<Mutex<Vec<Conversation>>> {
    let conversations: Arc<Mutex<Vec<Conversation>>> = Arc::new(Mutex::new(Vec::new()));
    let kept = Arc::downgrade(&conversations);
    session.register_invitation_callback(move |_, conversation| {
        println!("New conversation from {}:", conversation.parties().join(", "));
        if let Some(message) = conversation.invite_message() {
            println!("{message}");
        }
        conversation.set_inbound_callback(|line| {
            println!("{line}");
            Ok(())
        });
        if let Some(kept) = kept.upgrade() {
            kept.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conversation);
        }
        Ok(())
    });
    conversations
}

fn listen(session: &Session) -> Result<()> {
    session.set_availability(true)?;
    let _conversations = keep_accepted(session);

    log::info!("Listening for messages");
    let events = session.spawn_event_loop()?;
    events.join().context("Event loop failed")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Contacts { ref query } => {
            let session = login(&cli, &config)?;
            print_contacts(&session.contacts(query.as_deref())?)?;
        }
        Commands::Search { ref query } => {
            let session = login(&cli, &config)?;
            print_contacts(&session.search(query)?)?;
        }
        Commands::Chat {
            ref contact,
            ref message,
        } => {
            let session = login(&cli, &config)?;
            let to = session.resolve_contact(contact)?;
            let conversation = session.new_conversation(vec![to.uri()?]);
            conversation.send(message)?;
            println!("Sent to {to}");
        }
        Commands::Listen => {
            let session = login(&cli, &config)?;
            listen(&session)?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

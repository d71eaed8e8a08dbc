//! CLI command implementations.

use crate::KeyArgs;
use anyhow::{bail, Context, Result};
use parley_core::config::ServerConfig;
use parley_core::conversation::{ConversationEvent, Message};
use parley_core::crypto::{generate_pgp, generate_rsa, KeyPair, KeyType, PublicKey};
use parley_core::envelope::{open_envelope, seal_for};
use parley_core::{RouteHandler, Server};
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

/// Get password from user with secure input (masked).
fn get_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read password")
}

fn read_file(path: &str) -> Result<String> {
    let path = shellexpand::tilde(path).to_string();
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input)
}

fn load_keys(args: &KeyArgs) -> Result<Arc<KeyPair>> {
    let text = read_file(&args.key)?;
    let password = if args.passphrase {
        Some(get_password("Key passphrase: ")?)
    } else {
        None
    };

    let keys = KeyPair::from_private_text(args.key_type, &text, password.as_deref())
        .with_context(|| format!("Failed to load {} private key from {}", args.key_type, args.key))?;
    Ok(Arc::new(keys))
}

fn load_public(key_type: KeyType, path: &str) -> Result<Arc<PublicKey>> {
    let text = read_file(path)?;
    let key = PublicKey::from_text(key_type, &text)
        .with_context(|| format!("Failed to load {} public key from {}", key_type, path))?;
    Ok(Arc::new(key))
}

/// Generate a key pair and write `<out>` and `<out>.pub`.
pub fn keygen(key_type: KeyType, out: &str, bits: usize, user_id: &str, passphrase: bool) -> Result<()> {
    let public_path = format!("{}.pub", out);
    for path in [out, public_path.as_str()] {
        if Path::new(path).exists() {
            bail!("{} already exists; refusing to overwrite", path);
        }
    }

    let password = if passphrase {
        let first = get_password("New passphrase: ")?;
        let second = get_password("Repeat passphrase: ")?;
        if first != second {
            bail!("Passphrases do not match");
        }
        Some(first)
    } else {
        None
    };

    println!("Generating {} key pair...", key_type);
    let keys = match key_type {
        KeyType::Rsa => generate_rsa(bits)?,
        KeyType::Pgp => generate_pgp(user_id)?,
    };

    std::fs::write(out, keys.private_key().to_text(password.as_deref())?)
        .with_context(|| format!("Failed to write {}", out))?;
    std::fs::write(&public_path, keys.public_key().to_text()?)
        .with_context(|| format!("Failed to write {}", public_path))?;

    println!("Private key: {}", out);
    println!("Public key:  {}", public_path);
    Ok(())
}

/// Encrypt one message into a pasteable envelope.
pub fn encrypt(args: &KeyArgs, to: &str, message: Option<String>) -> Result<()> {
    let keys = load_keys(args)?;
    let recipient = load_public(args.key_type, to)?;
    let text = match message {
        Some(text) => text,
        None => read_stdin()?,
    };

    println!("{}", seal_for(&recipient, &keys, &text)?);
    Ok(())
}

/// Decrypt and verify a pasted envelope.
pub fn decrypt(args: &KeyArgs, envelope: Option<String>) -> Result<()> {
    let keys = load_keys(args)?;
    let envelope = match envelope {
        Some(text) => text,
        None => read_stdin()?,
    };

    let opened = open_envelope(&envelope, &keys).context("Envelope rejected")?;

    println!("--- sender public key ---");
    println!("{}", opened.sender_public_text.trim_end());
    println!("--- message ---");
    println!("{}", opened.plaintext.as_str());
    Ok(())
}

const CHAT_HELP: &str = "\
Commands:
  generate <alias> <peer-public-key-file>           start a conversation, print the token
  bootstrap <alias> <peer-public-key-file> <token>  join a conversation from a token
  send <id> <text...>                               send a message
  end <id> [text...]                                send a final message and end
  destroy <id>                                      end (if live) and forget
  list                                              show conversations
  help                                              show this help
  quit                                              end everything and exit";

/// Run the server and an interactive console until `quit` or Ctrl+C.
pub async fn chat(args: &KeyArgs, config: ServerConfig, direct: Option<SocketAddr>) -> Result<()> {
    let keys = load_keys(args)?;

    let server = match direct {
        Some(addr) => Server::bind_direct(addr, &config.http).await?,
        None => {
            println!("Starting onion service (this can take a minute)...");
            Server::start(&config)
                .await
                .context("Failed to start onion service; is Tor running with ControlPort enabled?")?
        }
    };
    let handler = server.handler();

    println!();
    println!("Address: {}", handler.address());
    println!("Key:     {}", keys.key_type());
    println!();
    println!("{}", CHAT_HELP);
    println!();

    let printer = tokio::spawn(print_events(handler.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match run_command(&handler, &keys, line.trim()).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    println!("Shutting down...");
    server.shutdown().await?;
    printer.abort();
    Ok(())
}

/// Execute one console line. Returns `true` on `quit`.
async fn run_command(handler: &RouteHandler, keys: &Arc<KeyPair>, line: &str) -> Result<bool> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(false);
    };
    let rest: Vec<&str> = words.collect();

    match (command, rest.as_slice()) {
        ("generate", [alias, peer_key]) => {
            let peer = load_public(keys.key_type(), peer_key)?;
            let invite = handler
                .generate_conversation(keys.clone(), peer, keys.key_type(), alias)
                .await?;
            println!("Conversation {} created. Send this token to {}:", short_id(&invite.id), alias);
            println!();
            println!("{}", invite.token);
            println!();
        }
        ("bootstrap", [alias, peer_key, token]) => {
            let peer = load_public(keys.key_type(), peer_key)?;
            let id = handler
                .bootstrap_conversation(token, keys.clone(), peer, alias)
                .await?;
            println!("Joined conversation {} with {}", short_id(&id), alias);
        }
        ("send", [id, text @ ..]) if !text.is_empty() => {
            let id = resolve_id(handler, id).await?;
            handler.send_text(&id, &text.join(" ")).await?;
        }
        ("end", [id, text @ ..]) => {
            let id = resolve_id(handler, id).await?;
            let text = text.join(" ");
            handler.end_conversation(&id, Some(text.as_str())).await?;
        }
        ("destroy", [id]) => {
            let id = resolve_id(handler, id).await?;
            handler.destroy_conversation(&id).await?;
        }
        ("list", []) => {
            let conversations = handler.conversations().await;
            if conversations.is_empty() {
                println!("No conversations");
            }
            for c in conversations {
                println!(
                    "{}  {:<16} {:<4} {:<8} {} messages",
                    short_id(&c.id),
                    c.alias,
                    c.key_type,
                    c.state,
                    c.message_count
                );
            }
        }
        ("help", []) => println!("{}", CHAT_HELP),
        ("quit", []) | ("exit", []) => return Ok(true),
        _ => println!("Unrecognized command. Type 'help'."),
    }

    Ok(false)
}

/// Accept a full conversation ID or a unique prefix of one.
async fn resolve_id(handler: &RouteHandler, prefix: &str) -> Result<String> {
    let matches: Vec<String> = handler
        .conversations()
        .await
        .into_iter()
        .map(|c| c.id)
        .filter(|id| id.starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(id.clone()),
        [] => bail!("No conversation matches {}", prefix),
        _ => bail!("{} is ambiguous", prefix),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

async fn print_events(mut events: broadcast::Receiver<ConversationEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &ConversationEvent) {
    match event {
        ConversationEvent::Created { id, alias } => {
            println!("* [{}] conversation with {} pending", short_id(id), alias);
        }
        ConversationEvent::Established { id } => {
            println!("* [{}] conversation active", short_id(id));
        }
        ConversationEvent::MessageReceived { id, message } => {
            println!("[{}] {} < {}", short_id(id), format_time(message), message.text);
        }
        ConversationEvent::MessageSent { id, message } => {
            println!("[{}] {} > {}", short_id(id), format_time(message), message.text);
        }
        ConversationEvent::Ended { id } => {
            println!("* [{}] conversation ended", short_id(id));
        }
        ConversationEvent::Deleted { id } => {
            println!("* [{}] conversation deleted", short_id(id));
        }
    }
}

fn format_time(message: &Message) -> String {
    chrono::DateTime::from_timestamp(message.unix_time, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

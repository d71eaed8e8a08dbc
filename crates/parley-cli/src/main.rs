//! Parley Command-Line Interface
//!
//! Key management, one-off encrypted envelopes, and an interactive chat
//! console over Tor onion services.

use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_core::KeyType;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

mod commands;

/// Parley - two-party encrypted chat over Tor
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where a private key comes from.
#[derive(clap::Args)]
pub struct KeyArgs {
    /// Private key file
    #[arg(short, long)]
    key: String,

    /// Key scheme: rsa or pgp
    #[arg(short = 't', long = "type", default_value = "rsa")]
    key_type: KeyType,

    /// Prompt for the passphrase protecting the private key
    #[arg(short, long)]
    passphrase: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair (writes <out> and <out>.pub)
    Keygen {
        /// Key scheme: rsa or pgp
        key_type: KeyType,

        /// Output path for the private key
        #[arg(short, long)]
        out: String,

        /// RSA modulus size in bits
        #[arg(long, default_value_t = parley_core::crypto::MIN_RSA_BITS)]
        bits: usize,

        /// OpenPGP user ID
        #[arg(long, default_value = parley_core::crypto::DEFAULT_PGP_USER_ID)]
        user_id: String,

        /// Protect the private key with a passphrase (prompted)
        #[arg(short, long)]
        passphrase: bool,
    },

    /// Encrypt a message for a recipient into a pasteable envelope
    Encrypt {
        #[command(flatten)]
        keys: KeyArgs,

        /// Recipient public key file
        #[arg(long)]
        to: String,

        /// Message text (read from stdin if omitted)
        message: Option<String>,
    },

    /// Decrypt and verify an envelope
    Decrypt {
        #[command(flatten)]
        keys: KeyArgs,

        /// Envelope text (read from stdin if omitted)
        envelope: Option<String>,
    },

    /// Start the server and open the chat console
    Chat {
        #[command(flatten)]
        keys: KeyArgs,

        /// Serve on this address without Tor (local testing only)
        #[arg(long)]
        direct: Option<SocketAddr>,

        /// Tor SOCKS5 proxy address
        #[arg(long, env = "PARLEY_SOCKS_ADDR")]
        socks_addr: Option<SocketAddr>,

        /// Tor control port address
        #[arg(long, env = "PARLEY_CONTROL_ADDR")]
        control_addr: Option<SocketAddr>,

        /// Local port behind the onion service (0 = ephemeral)
        #[arg(long, env = "PARLEY_LOCAL_PORT")]
        local_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen {
            key_type,
            out,
            bits,
            user_id,
            passphrase,
        } => {
            let out = shellexpand::tilde(&out).to_string();
            commands::keygen(key_type, &out, bits, &user_id, passphrase)?;
        }
        Commands::Encrypt { keys, to, message } => {
            commands::encrypt(&keys, &to, message)?;
        }
        Commands::Decrypt { keys, envelope } => {
            commands::decrypt(&keys, envelope)?;
        }
        Commands::Chat {
            keys,
            direct,
            socks_addr,
            control_addr,
            local_port,
        } => {
            let mut config = parley_core::ServerConfig::default();
            if let Some(addr) = socks_addr {
                config.tor.socks_addr = addr;
            }
            if let Some(addr) = control_addr {
                config.tor.control_addr = addr;
            }
            if let Some(port) = local_port {
                config.onion.local_port = port;
            }
            commands::chat(&keys, config, direct).await?;
        }
    }

    Ok(())
}

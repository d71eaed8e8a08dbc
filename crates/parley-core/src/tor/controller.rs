//! Tor ControlPort client.
//!
//! Speaks the subset of control-spec.txt Parley needs: PROTOCOLINFO,
//! AUTHENTICATE (cookie, password or none), GETINFO, and ephemeral
//! ADD_ONION/DEL_ONION.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Authentication method for Tor ControlPort.
#[derive(Debug, Clone)]
pub enum TorAuth {
    /// No authentication required.
    None,
    /// Cookie authentication (reads from file).
    Cookie(String),
    /// Password authentication.
    Password(String),
}

/// Cookie locations tried when PROTOCOLINFO's path is unreadable.
const COMMON_COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
];

/// Tor ControlPort client.
pub struct TorController {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    authenticated: bool,
}

impl TorController {
    /// Connect to Tor ControlPort.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Tor(format!("failed to connect to control port {}: {}", addr, e)))?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            authenticated: false,
        })
    }

    /// Send a command and collect the reply lines, status prefix stripped.
    async fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("{}\r\n", cmd).as_bytes())
            .await
            .map_err(|e| Error::Tor(format!("failed to send command: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Tor(format!("failed to flush: {}", e)))?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Tor(format!("failed to read response: {}", e)))?;
            if read == 0 {
                return Err(Error::Tor("control port closed the connection".into()));
            }

            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            match parse_reply_line(line)? {
                ReplyLine::Mid(text) => lines.push(text.to_string()),
                ReplyLine::End(text) => {
                    lines.push(text.to_string());
                    break;
                }
            }
        }

        Ok(lines)
    }

    /// Get protocol info to determine authentication method.
    pub async fn get_protocol_info(&mut self) -> Result<ProtocolInfo> {
        let lines = self.command("PROTOCOLINFO 1").await?;
        Ok(ProtocolInfo::parse(&lines))
    }

    /// Authenticate with the control port.
    pub async fn authenticate(&mut self, auth: TorAuth) -> Result<()> {
        let cmd = match auth {
            TorAuth::None => "AUTHENTICATE".to_string(),
            TorAuth::Cookie(path) => {
                let cookie = tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::Tor(format!("failed to read cookie file: {}", e)))?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
            TorAuth::Password(password) => {
                format!("AUTHENTICATE \"{}\"", escape_tor_string(&password))
            }
        };

        self.command(&cmd).await?;
        self.authenticated = true;

        tracing::info!("Authenticated with Tor control port");
        Ok(())
    }

    /// Authenticate with whatever the daemon offers: cookie first, then none.
    pub async fn authenticate_auto(&mut self) -> Result<()> {
        let info = self.get_protocol_info().await?;

        tracing::debug!(methods = ?info.auth_methods, cookie = ?info.cookie_file, "Tor auth methods");

        if info.supports("COOKIE") || info.supports("SAFECOOKIE") {
            if let Some(cookie_path) = &info.cookie_file {
                match self.authenticate(TorAuth::Cookie(cookie_path.clone())).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(path = %cookie_path, error = %e, "Cookie auth failed");
                    }
                }
            }
            for path in COMMON_COOKIE_PATHS {
                if Path::new(path).exists() {
                    match self.authenticate(TorAuth::Cookie((*path).to_string())).await {
                        Ok(()) => return Ok(()),
                        Err(e) => tracing::debug!(path, error = %e, "Cookie auth failed"),
                    }
                }
            }
        }

        if info.supports("NULL") {
            return self.authenticate(TorAuth::None).await;
        }

        Err(Error::Tor(
            "no usable ControlPort authentication method (is your user allowed to read the cookie?)".into(),
        ))
    }

    /// Register an ephemeral onion service with a fresh key Tor discards.
    ///
    /// Returns the service ID (hostname without `.onion`).
    pub async fn add_onion(&mut self, virtual_port: u16, target_port: u16) -> Result<String> {
        if !self.authenticated {
            return Err(Error::Tor("not authenticated".into()));
        }

        let cmd = format!(
            "ADD_ONION NEW:ED25519-V3 Flags=DiscardPK Port={},127.0.0.1:{}",
            virtual_port, target_port
        );
        let response = self.command(&cmd).await?;

        let service_id = response
            .iter()
            .find_map(|line| line.strip_prefix("ServiceID="))
            .map(str::to_string)
            .ok_or_else(|| Error::Tor("no ServiceID in response".into()))?;

        tracing::info!(virtual_port, target_port, "Created onion service");

        Ok(service_id)
    }

    /// Remove an onion service.
    pub async fn del_onion(&mut self, service_id: &str) -> Result<()> {
        if !self.authenticated {
            return Err(Error::Tor("not authenticated".into()));
        }

        self.command(&format!("DEL_ONION {}", service_id)).await?;

        tracing::info!("Removed onion service");
        Ok(())
    }

    /// Get the Tor version.
    pub async fn get_version(&mut self) -> Result<String> {
        let lines = self.command("GETINFO version").await?;
        lines
            .iter()
            .find_map(|line| line.strip_prefix("version="))
            .map(str::to_string)
            .ok_or_else(|| Error::Tor("version not found in response".into()))
    }

    /// Check if Tor has established circuits.
    pub async fn is_ready(&mut self) -> Result<bool> {
        let lines = self.command("GETINFO status/circuit-established").await?;
        Ok(lines.iter().any(|line| line.contains("circuit-established=1")))
    }

    /// Poll until Tor has circuits or `timeout` elapses.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.is_ready().await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(Error::Timeout)
    }
}

/// Information from PROTOCOLINFO response.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Available authentication methods.
    pub auth_methods: Vec<String>,
    /// Path to control port cookie file for authentication.
    pub cookie_file: Option<String>,
}

impl ProtocolInfo {
    /// Parse `AUTH METHODS=... COOKIEFILE="..."` out of a PROTOCOLINFO reply.
    fn parse(lines: &[String]) -> Self {
        let mut info = Self::default();

        for auth in lines.iter().filter_map(|line| line.strip_prefix("AUTH ")) {
            if let Some(rest) = auth.split_once("METHODS=").map(|(_, rest)| rest) {
                let methods = rest.split(' ').next().unwrap_or_default();
                info.auth_methods = methods.split(',').map(String::from).collect();
            }
            if let Some(rest) = auth.split_once("COOKIEFILE=\"").map(|(_, rest)| rest) {
                if let Some((path, _)) = rest.split_once('"') {
                    info.cookie_file = Some(path.to_string());
                }
            }
        }

        info
    }

    fn supports(&self, method: &str) -> bool {
        self.auth_methods.iter().any(|m| m == method)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReplyLine<'a> {
    Mid(&'a str),
    End(&'a str),
}

/// Split `250-text` / `250 text` / `250+text`; any non-2xx status is an error.
fn parse_reply_line(line: &str) -> Result<ReplyLine<'_>> {
    let (code, rest) = match (line.get(..3), line.get(3..)) {
        (Some(code), Some(rest)) if code.bytes().all(|b| b.is_ascii_digit()) => (code, rest),
        _ => return Err(Error::Tor(format!("malformed control reply: {}", line))),
    };

    if !code.starts_with('2') {
        return Err(Error::Tor(format!("control port error: {}", line)));
    }

    let mut chars = rest.chars();
    match chars.next() {
        None => Ok(ReplyLine::End("")),
        Some(' ') => Ok(ReplyLine::End(chars.as_str())),
        Some('-') | Some('+') => Ok(ReplyLine::Mid(chars.as_str())),
        Some(_) => Err(Error::Tor(format!("malformed control reply: {}", line))),
    }
}

/// Escape a string for Tor control protocol.
fn escape_tor_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

//! SSH channel implementation using russh.
//!
//! Russh is a pure-Rust, async-native SSH library that integrates directly
//! with Tokio. One [`SshChannel`] wraps one authenticated session; every
//! `run` opens a fresh exec channel on that session.
//!
//! Host keys are accepted on first sight (the behavior of the provider
//! this engine replaces, which disabled host-key checking outright). The
//! acceptance is logged at warn level so it is visible in operation logs.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::{
    AuthMethod, Channel, ChannelFactory, CommandResult, ConnectionConfig, ConnectionError,
    ConnectionResult,
};

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Russh-related error type - wraps russh::Error for compatibility with the
/// Handler trait.
#[derive(Debug)]
pub struct RusshError(pub ::russh::Error);

impl From<::russh::Error> for RusshError {
    fn from(err: ::russh::Error) -> Self {
        RusshError(err)
    }
}

impl std::fmt::Display for RusshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Russh error: {}", self.0)
    }
}

impl std::error::Error for RusshError {}

impl From<::russh::Error> for ConnectionError {
    fn from(err: ::russh::Error) -> Self {
        ConnectionError::SshError(format!("Russh error: {}", err))
    }
}

/// Client handler accepting server host keys on first sight.
struct ClientHandler {
    host: String,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = RusshError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(
            host = %self.host,
            "Accepting server host key without verification"
        );
        Ok(true)
    }
}

/// An authenticated SSH session to one Windows host.
///
/// The handle lives behind an RwLock so `run` can open channels under a
/// read lock while `close` takes the write lock to consume the handle.
pub struct SshChannel {
    /// Host this channel is connected to (for error context and logging).
    host: String,
    /// Session identifier: `user@host:port`.
    identifier: String,
    /// Russh client handle. `None` after close.
    handle: RwLock<Option<Handle<ClientHandler>>>,
    /// Whether the session is established.
    connected: AtomicBool,
}

impl SshChannel {
    /// Open an authenticated session described by `config`.
    pub async fn connect(config: &ConnectionConfig) -> ConnectionResult<Self> {
        debug!(
            host = %config.host,
            port = %config.port,
            user = %config.user,
            "Connecting via SSH (russh)"
        );

        let handle = Self::do_connect(config).await?;

        debug!(identifier = %config.identifier(), "SSH session established");

        Ok(Self {
            host: config.host.clone(),
            identifier: config.identifier(),
            handle: RwLock::new(Some(handle)),
            connected: AtomicBool::new(true),
        })
    }

    async fn do_connect(config: &ConnectionConfig) -> ConnectionResult<Handle<ClientHandler>> {
        let mut ssh_config = russh::client::Config::default();
        ssh_config.inactivity_timeout = Some(CONNECT_TIMEOUT);
        // Prefer fast, modern algorithms for negotiation
        ssh_config.preferred = russh::Preferred {
            kex: std::borrow::Cow::Borrowed(&[
                russh::kex::CURVE25519,
                russh::kex::CURVE25519_PRE_RFC_8731,
            ]),
            cipher: std::borrow::Cow::Borrowed(&[
                russh::cipher::CHACHA20_POLY1305,
                russh::cipher::AES_256_GCM,
            ]),
            key: std::borrow::Cow::Borrowed(&[
                russh::keys::key::ED25519,
                russh::keys::key::RSA_SHA2_256,
                russh::keys::key::RSA_SHA2_512,
            ]),
            mac: std::borrow::Cow::Borrowed(&[russh::mac::HMAC_SHA256, russh::mac::HMAC_SHA512]),
            compression: std::borrow::Cow::Borrowed(&[russh::compression::NONE]),
        };
        let ssh_config = Arc::new(ssh_config);

        let addr = format!("{}:{}", config.host, config.port);
        let socket = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(CONNECT_TIMEOUT.as_secs()))?
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        // TCP_NODELAY for lower command round-trip latency
        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let handler = ClientHandler {
            host: config.host.clone(),
        };

        let mut session = russh::client::connect_stream(ssh_config, socket, handler)
            .await
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", e))
            })?;

        Self::authenticate(&mut session, &config.user, &config.auth).await?;

        Ok(session)
    }

    /// Authenticate with exactly the configured credential method.
    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        user: &str,
        auth: &AuthMethod,
    ) -> ConnectionResult<()> {
        match auth {
            AuthMethod::PrivateKey(key_path) => Self::key_auth(session, user, key_path).await,
            AuthMethod::Password(password) => {
                let authenticated = session
                    .authenticate_password(user, password)
                    .await
                    .map_err(|e| {
                        ConnectionError::AuthenticationFailed(format!(
                            "Password authentication failed: {}",
                            e
                        ))
                    })?;
                if authenticated {
                    debug!("Authenticated using password");
                    Ok(())
                } else {
                    Err(ConnectionError::AuthenticationFailed(
                        "Password rejected by server".to_string(),
                    ))
                }
            }
        }
    }

    /// Key-based authentication. Ed25519 and RSA keys are supported; the
    /// key type is detected from the file format by `load_secret_key`.
    async fn key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
    ) -> ConnectionResult<()> {
        if !key_path.exists() {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "Key file not found: {}",
                key_path.display()
            )));
        }

        let key_pair = load_secret_key(key_path, None).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!(
                "Failed to load key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        let authenticated = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "Key authentication failed for {}: {}",
                    key_path.display(),
                    e
                ))
            })?;

        if authenticated {
            debug!(key = %key_path.display(), "Authenticated using key");
            Ok(())
        } else {
            Err(ConnectionError::AuthenticationFailed(
                "Key rejected by server".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Channel for SshChannel {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> ConnectionResult<CommandResult> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionClosed);
        }

        trace!(command = %command, "Executing remote command");

        let handle_guard = self.handle.read().await;
        let handle: &Handle<ClientHandler> = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to open channel: {}", e))
        })?;

        drop(handle_guard);

        channel.exec(true, command).await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to execute command: {}", e))
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout.extend_from_slice(data);
                }
                ChannelMsg::ExtendedData { ref data, ext } => {
                    // Extended data type 1 is stderr
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status);
                }
                ChannelMsg::Eof => {
                    // Keep reading until the channel closes
                }
                ChannelMsg::Close => {
                    break;
                }
                _ => {}
            }
        }

        let _ = channel.eof().await;

        let result = exec_outcome(exit_code, &stdout, &stderr)?;

        trace!(exit_code = %result.exit_code, "Command completed");

        Ok(result)
    }

    async fn close(&self) -> ConnectionResult<()> {
        debug!(identifier = %self.identifier, "Closing SSH session");

        self.connected.store(false, Ordering::SeqCst);

        let handle = {
            let mut handle_guard = self.handle.write().await;
            handle_guard.take()
        };

        if let Some(handle) = handle {
            let _ = handle
                .disconnect(
                    russh::Disconnect::ByApplication,
                    "Connection closed by client",
                    "en",
                )
                .await;
        }

        Ok(())
    }
}

/// Map a finished exec channel to a command result.
///
/// A session that closes without ever reporting an exit status is a
/// transport anomaly, not a remote exit code; it surfaces as an execution
/// failure rather than an invented code.
fn exec_outcome(
    exit_code: Option<u32>,
    stdout: &[u8],
    stderr: &[u8],
) -> ConnectionResult<CommandResult> {
    let stdout = String::from_utf8_lossy(stdout).to_string();
    let stderr = String::from_utf8_lossy(stderr).to_string();

    match exit_code {
        Some(0) => Ok(CommandResult::success(stdout, stderr)),
        Some(code) => Ok(CommandResult::failure(code as i32, stdout, stderr)),
        None => Err(ConnectionError::ExecutionFailed(format!(
            "command finished without reporting an exit status; stderr: {:?}",
            stderr.trim()
        ))),
    }
}

/// Opens [`SshChannel`]s. The production [`ChannelFactory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SshChannelFactory;

impl SshChannelFactory {
    /// Create a new SSH channel factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelFactory for SshChannelFactory {
    async fn open(&self, config: &ConnectionConfig) -> ConnectionResult<Box<dyn Channel>> {
        let channel = SshChannel::connect(config).await?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_outcome_zero_exit_is_success() {
        let result = exec_outcome(Some(0), b"done", b"").unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "done");
    }

    #[test]
    fn exec_outcome_nonzero_exit_is_failure_result() {
        let result = exec_outcome(Some(2), b"", b"boom").unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stderr, "boom");
    }

    #[test]
    fn exec_outcome_missing_exit_status_is_transport_error() {
        let err = exec_outcome(None, b"", b"session torn down").unwrap_err();
        match err {
            ConnectionError::ExecutionFailed(message) => {
                assert!(message.contains("without reporting an exit status"));
                assert!(message.contains("session torn down"));
            }
            other => panic!("expected ExecutionFailed, got: {:?}", other),
        }
    }
}

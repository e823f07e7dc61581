//! Remote execution channel for Windows hosts.
//!
//! This module provides the transport seam between the reconciliation
//! engine and the remote host: an authenticated channel that runs opaque
//! command strings and returns captured output plus an exit status.
//!
//! # Contract
//!
//! Command strings are opaque to the channel. It performs no interpretation,
//! no escaping, and no retries; any retry policy belongs to the caller at a
//! higher layer. A channel is opened per reconciliation operation and must
//! be closed on every exit path, which the [`Reconciler`] guarantees.
//!
//! The [`ChannelFactory`] trait is the substitution point: production code
//! uses [`SshChannelFactory`], tests script a fake.
//!
//! [`Reconciler`]: crate::reconcile::Reconciler
//! [`SshChannelFactory`]: ssh::SshChannelFactory

/// SSH channel implementation using russh.
pub mod ssh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use ssh::{SshChannel, SshChannelFactory};

/// Errors that can occur while opening a channel or running commands.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the initial connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote host.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No credential method was supplied. The channel fails closed rather
    /// than attempting an unauthenticated session.
    #[error("No authentication method provided (password or private key path required)")]
    NoCredentials,

    /// Command execution failed at the transport level (not a non-zero
    /// exit code, which is reported through [`CommandResult`]).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Connection establishment timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// The channel was used after being closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// SSH-specific error from the underlying implementation.
    #[error("SSH error: {0}")]
    SshError(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for channel operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Credential method for opening a channel.
///
/// Exactly one method is used per connection. When the caller supplies
/// both a password and a key path, the key takes precedence; when it
/// supplies neither, resolution fails closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    /// Password authentication.
    Password(String),
    /// Private key file authentication.
    PrivateKey(PathBuf),
}

impl AuthMethod {
    /// Resolve a credential method from optional caller-supplied fields.
    ///
    /// Key path wins over password when both are present. Neither present
    /// is an error, never a silent unauthenticated session.
    pub fn resolve(
        password: Option<String>,
        private_key_path: Option<PathBuf>,
    ) -> ConnectionResult<Self> {
        match (private_key_path, password) {
            (Some(path), _) => Ok(AuthMethod::PrivateKey(path)),
            (None, Some(password)) => Ok(AuthMethod::Password(password)),
            (None, None) => Err(ConnectionError::NoCredentials),
        }
    }
}

/// Parameters for opening a channel to one host.
///
/// Created per reconciliation operation and passed by value; the engine
/// holds no ambient connection state. Whether the caller sourced these
/// from a global default or a per-entity override is invisible here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Hostname or IP address of the Windows host.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Username for the SSH session.
    pub user: String,
    /// Credential method.
    pub auth: AuthMethod,
}

impl ConnectionConfig {
    /// Default SSH port, matching the provider this engine replaces.
    pub const DEFAULT_PORT: u16 = 22;

    /// Create a connection config for `user@host:22`.
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            user: user.into(),
            auth,
        }
    }

    /// Override the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Identifier for logging: `user@host:port`.
    pub fn identifier(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// The result of executing a command over a channel.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// An open, authenticated execution channel to one host.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The host this channel is connected to.
    fn host(&self) -> &str;

    /// Execute a command string on the remote host.
    ///
    /// The string is passed through verbatim. A non-zero remote exit code
    /// is a successful `run` with `result.success == false`; only transport
    /// failures produce an `Err`.
    async fn run(&self, command: &str) -> ConnectionResult<CommandResult>;

    /// Close the channel. Safe to call once on every exit path.
    async fn close(&self) -> ConnectionResult<()>;
}

/// Factory for opening channels.
///
/// The reconciler opens a fresh channel per operation through this trait,
/// which is where tests substitute scripted transports.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Open an authenticated channel to the configured host.
    async fn open(&self, config: &ConnectionConfig) -> ConnectionResult<Box<dyn Channel>>;
}

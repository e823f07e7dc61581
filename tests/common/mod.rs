//! Scripted fake channel for integration tests.
//!
//! Each reconciliation operation opens one channel; the fake factory hands
//! out one scripted channel per `open` call. A script is an ordered queue
//! of command results, served in the order the engine runs commands. Every
//! executed command and every close is recorded so tests can assert on
//! exactly what went over the wire.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use windows_dsc::connection::{
    Channel, ChannelFactory, CommandResult, ConnectionConfig, ConnectionError, ConnectionResult,
};

/// A channel that replays a pre-scripted sequence of command results.
pub struct FakeChannel {
    host: String,
    responses: Mutex<VecDeque<CommandResult>>,
    log: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Channel for FakeChannel {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> ConnectionResult<CommandResult> {
        self.log.lock().unwrap().push(command.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| {
                ConnectionError::ExecutionFailed(format!(
                    "test script exhausted; unexpected command: {}",
                    command
                ))
            })
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one scripted [`FakeChannel`] per `open` call.
pub struct FakeFactory {
    scripts: Mutex<VecDeque<VecDeque<CommandResult>>>,
    log: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    opens: AtomicUsize,
    fail_open: bool,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
            fail_open: false,
        }
    }

    /// A factory whose every `open` fails with a connection error.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    /// Queue the command results for the next operation's channel.
    pub fn script(&self, responses: impl IntoIterator<Item = CommandResult>) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(responses.into_iter().collect());
    }

    /// Every command executed, across all channels, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Commands that applied a DSC configuration.
    pub fn apply_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains("Start-DscConfiguration"))
            .collect()
    }

    /// Total channel closes observed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Total channels opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelFactory for FakeFactory {
    async fn open(&self, config: &ConnectionConfig) -> ConnectionResult<Box<dyn Channel>> {
        if self.fail_open {
            return Err(ConnectionError::AuthenticationFailed(
                "scripted auth failure".to_string(),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let responses = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no script queued for this operation");
        Ok(Box::new(FakeChannel {
            host: config.host.clone(),
            responses: Mutex::new(responses),
            log: Arc::clone(&self.log),
            closes: Arc::clone(&self.closes),
        }))
    }
}

// Canned remote outputs, shaped like real Get-WindowsFeature responses.

pub fn installed(name: &str) -> CommandResult {
    CommandResult::success(
        format!("\r\nName      : {}\r\nInstalled : True\r\n\r\n", name),
        String::new(),
    )
}

pub fn not_installed(name: &str) -> CommandResult {
    CommandResult::success(
        format!("\r\nName      : {}\r\nInstalled : False\r\n\r\n", name),
        String::new(),
    )
}

pub fn feature_not_found(name: &str) -> CommandResult {
    CommandResult::failure(
        1,
        String::new(),
        format!(
            "Get-WindowsFeature : ArgumentNotValid: The role, role service, or feature name \
             '{}' was not found.\n+ FullyQualifiedErrorId : NameDoesNotExist,FeatureNotFound",
            name
        ),
    )
}

pub fn sub_features(names: &[&str]) -> CommandResult {
    CommandResult::success(names.join("\r\n"), String::new())
}

pub fn apply_ok() -> CommandResult {
    CommandResult::success("Operation completed.".to_string(), String::new())
}

pub fn apply_failed(exit_code: i32, message: &str) -> CommandResult {
    CommandResult::failure(exit_code, String::new(), message.to_string())
}

/// A connection config pointing at the fake transport.
pub fn test_conn(host: &str) -> ConnectionConfig {
    use windows_dsc::connection::AuthMethod;
    ConnectionConfig::new(host, "administrator", AuthMethod::Password("secret".into()))
}

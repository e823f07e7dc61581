//! # windows-dsc - Declarative Windows Feature Reconciliation
//!
//! This crate reconciles the desired state of a named Windows feature on a
//! remote host against its actual installed state. It connects over SSH,
//! queries actual state with `Get-WindowsFeature`, compiles the desired
//! state into a self-contained PowerShell DSC document, applies it, and
//! re-inspects to verify the result.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Lifecycle Adapter                        │
//! │        (create / read / update / delete verbs)           │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Reconciler                           │
//! │   connect → inspect → decide → converge → verify         │
//! └──────────────────────────────────────────────────────────┘
//!           │                │                    │
//!           ▼                ▼                    ▼
//! ┌───────────────┐ ┌─────────────────┐ ┌──────────────────┐
//! │   Inspector   │ │    Compiler     │ │     Channel      │
//! │ (actual state)│ │ (DSC document)  │ │  (SSH transport) │
//! └───────────────┘ └─────────────────┘ └──────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use windows_dsc::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> windows_dsc::Result<()> {
//!     let conn = ConnectionConfig::new(
//!         "winsrv01",
//!         "administrator",
//!         AuthMethod::resolve(None, Some("/home/op/.ssh/id_ed25519".into()))?,
//!     );
//!
//!     let desired = DesiredState::new("Web-Server", Ensure::Present)
//!         .with_sub_features(["Web-Mgmt-Console"]);
//!
//!     let resource = WindowsFeatureResource::new(SshChannelFactory::new());
//!     let (identity, result) = resource.create(&conn, &desired).await?;
//!     println!("{} converged (changed: {})", identity, result.changed);
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees and limitations
//!
//! - Reconciliation is idempotent: a second run with the same desired
//!   state and no external drift issues no apply.
//! - Compilation is deterministic and treats feature names as data;
//!   names with interpreter-significant characters are rejected.
//! - One channel per operation, closed on every exit path.
//! - No internal timeouts or retries: wrap the whole operation in a
//!   caller-side deadline if needed.
//! - No mutual exclusion between concurrent operations on the same
//!   feature and host; the lifecycle driver must serialize per identity.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod compile;
pub mod connection;
pub mod error;
pub mod inspect;
pub mod reconcile;
pub mod resource;

pub use compile::{compile, ConfigurationPayload, DesiredState, Ensure};
pub use connection::{
    AuthMethod, Channel, ChannelFactory, CommandResult, ConnectionConfig, ConnectionError,
    SshChannel, SshChannelFactory,
};
pub use error::{Error, Result};
pub use inspect::{FeatureState, Inspector};
pub use reconcile::{Diagnostic, Phase, ReconciliationResult, Reconciler, Severity};
pub use resource::{ExternalIdentity, WindowsFeatureResource};

/// Convenient re-exports of commonly used types and traits.
pub mod prelude {
    pub use crate::compile::{DesiredState, Ensure};
    pub use crate::connection::{
        AuthMethod, Channel, ChannelFactory, ConnectionConfig, SshChannelFactory,
    };
    pub use crate::error::{Error, Result};
    pub use crate::inspect::FeatureState;
    pub use crate::reconcile::{ReconciliationResult, Reconciler};
    pub use crate::resource::{ExternalIdentity, WindowsFeatureResource};
}

//! Run Active Directory administration actions over LDAP.
//!
//! The library exposes a fixed set of actions (searching, reading attributes,
//! editing group memberships, locking state, moving objects and resetting
//! passwords) that a host invokes by name with a flat parameter mapping. Each
//! invocation produces an [`ActionResult`] with a status, data records and a
//! summary, so the host can branch on the outcome without parsing messages.
//!
//! A single connection is bound lazily on first use, kept for later actions
//! and rebound whenever it has gone stale. Account names can be resolved to
//! distinguished names in one search per batch.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! A minimal example of running an action might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use ad_ldap_actions::{AdLdap, Config, State};
//! use serde_json::json;
//!
//! // Configuration is usually handed over by the host as a flat mapping.
//! let config = Config::from_value(json!({
//!     "server": "dc01.example.com",
//!     "username": "EXAMPLE\\svc-soar",
//!     "password": "verysecret",
//!     "force_ssl": true,
//!     "ssl_port": "636",
//! }))?;
//!
//! let mut client = AdLdap::new(config, State::default());
//! let parameters = json!({
//!     "members": "alice;bob",
//!     "groups": "vpn-users",
//!     "use_samaccountname": true,
//! });
//! let result = client
//!     .handle_action("add_group_members", parameters.as_object().ok_or("not an object")?)
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//!
//! let _state = client.finalize().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Enabling and disabling accounts reads the account-control flags and
//!   writes them back; a concurrent change to the same attribute in between is
//!   overwritten.
//! * Actions take `&mut self`. Hosts running actions concurrently need one
//!   client per task or a mutex around a shared one.
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the bind
//!   password, it probably should be

pub mod action;
pub mod config;
pub mod connection;
pub mod directory;
pub mod entry;
pub mod error;
pub mod extend;
pub mod ldap;
#[cfg(test)]
mod mock;
pub mod query;
pub mod resolver;
pub mod result;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	action::Action,
	config::{Config, ConnectionConfig, TLSConfig},
	entry::SearchEntryExt,
	error::Error,
	ldap::{AdLdap, ProgressCallback, State},
	result::{ActionParameters, ActionResult, Status},
};

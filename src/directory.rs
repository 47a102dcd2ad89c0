//! The directory operations this crate consumes, and their implementation on
//! top of [`ldap3`].
//!
//! Everything above this module talks to a [`Session`], never to
//! [`ldap3::Ldap`] directly, so that the connection lifecycle and the action
//! handlers do not depend on a reachable server.
use std::collections::HashSet;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ldap3::{parse_refs, LdapConnAsync, LdapResult, Mod, Scope, SearchEntry};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
	config::Config,
	error::{describe_result_code, Error},
};

/// A normalized search hit.
pub type DirectoryRecord = SearchEntry;

/// Result code and diagnostic text of a completed directory operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
	/// LDAP result code, `0` on success.
	pub code: u32,
	/// Diagnostic message sent by the server.
	pub text: String,
}

impl Outcome {
	/// A successful outcome with no diagnostic message.
	#[must_use]
	pub fn success() -> Self {
		Self { code: 0, text: String::new() }
	}

	/// Whether the directory reported success.
	#[must_use]
	pub fn is_success(&self) -> bool {
		self.code == 0
	}

	/// Name of the result code, e.g. `invalidCredentials`.
	#[must_use]
	pub fn description(&self) -> &'static str {
		describe_result_code(self.code)
	}

	/// Turn a non-success outcome into an [`Error::Operation`].
	pub fn into_result(self) -> Result<(), Error> {
		if self.is_success() {
			Ok(())
		} else {
			Err(Error::operation(self.code, self.text))
		}
	}
}

impl From<LdapResult> for Outcome {
	fn from(result: LdapResult) -> Self {
		Self { code: result.rc, text: result.text }
	}
}

/// One item of a search response.
#[derive(Debug, Clone)]
pub enum ResponseItem {
	/// A directory entry (`searchResEntry`).
	Entry(SearchEntry),
	/// A continuation reference pointing at other servers (`searchResRef`).
	Referral(Vec<String>),
}

/// Everything a search returned, in the order the server sent it.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
	/// The raw response items, referrals included.
	pub items: Vec<ResponseItem>,
}

impl SearchResponse {
	/// The entries of the response, skipping referrals.
	pub fn entries(&self) -> impl Iterator<Item = &SearchEntry> {
		self.items.iter().filter_map(|item| match item {
			ResponseItem::Entry(entry) => Some(entry),
			ResponseItem::Referral(_) => None,
		})
	}

	/// Serialize the response for the caller. Binary attribute values are
	/// base64 encoded under `raw_attributes`.
	#[must_use]
	pub fn to_record(&self) -> Map<String, Value> {
		let entries: Vec<Value> = self
			.items
			.iter()
			.map(|item| match item {
				ResponseItem::Entry(entry) => {
					let raw: Map<String, Value> = entry
						.bin_attrs
						.iter()
						.map(|(name, values)| {
							let encoded = values.iter().map(|v| Value::from(STANDARD.encode(v)));
							(name.clone(), Value::Array(encoded.collect()))
						})
						.collect();
					json!({
						"type": "searchResEntry",
						"dn": entry.dn,
						"attributes": entry.attrs,
						"raw_attributes": raw,
					})
				}
				ResponseItem::Referral(uris) => json!({ "type": "searchResRef", "uri": uris }),
			})
			.collect();
		Map::from_iter([("entries".to_owned(), Value::Array(entries))])
	}
}

/// The first relative distinguished name of `dn`, e.g. `CN=Smith\, John` of
/// `CN=Smith\, John,OU=Staff,DC=example,DC=com`. Escaped and quoted commas do
/// not end the component.
pub fn first_rdn(dn: &str) -> Result<&str, Error> {
	let mut escaped = false;
	let mut quoted = false;
	let mut end = dn.len();
	for (index, c) in dn.char_indices() {
		match c {
			_ if escaped => escaped = false,
			'\\' => escaped = true,
			'"' => quoted = !quoted,
			',' | ';' if !quoted => {
				end = index;
				break;
			}
			_ => {}
		}
	}
	let rdn = dn[..end].trim();
	match rdn.split_once('=') {
		Some((attribute, value)) if !attribute.trim().is_empty() && !value.trim().is_empty() => {
			Ok(rdn)
		}
		_ => Err(Error::Invalid(format!("distinguished name {dn}"))),
	}
}

/// How a [`Modification`] changes the attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModifyOperation {
	/// Add values to the attribute.
	Add,
	/// Remove the given values, or the whole attribute if none are given.
	Delete,
	/// Replace all values of the attribute.
	Replace,
}

/// A change to one attribute of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
	/// What to do with the values.
	pub operation: ModifyOperation,
	/// Name of the attribute.
	pub attribute: String,
	/// Values to add, delete or replace with.
	pub values: Vec<Vec<u8>>,
}

impl Modification {
	/// Create a modification from textual values.
	pub fn new<I, V>(operation: ModifyOperation, attribute: &str, values: I) -> Self
	where
		I: IntoIterator<Item = V>,
		V: Into<String>,
	{
		Self {
			operation,
			attribute: attribute.to_owned(),
			values: values.into_iter().map(|v| v.into().into_bytes()).collect(),
		}
	}

	/// Convert into the [`ldap3`] representation.
	fn into_mod(self) -> Mod<Vec<u8>> {
		let attribute = self.attribute.into_bytes();
		let values: HashSet<Vec<u8>> = self.values.into_iter().collect();
		match self.operation {
			ModifyOperation::Add => Mod::Add(attribute, values),
			ModifyOperation::Delete => Mod::Delete(attribute, values),
			ModifyOperation::Replace => Mod::Replace(attribute, values),
		}
	}
}

/// A connection to the directory server.
#[async_trait]
pub trait Session: Send + std::fmt::Debug {
	/// Authenticate with a simple bind.
	async fn bind(&mut self, user: &str, password: &str) -> Result<Outcome, Error>;

	/// Whether the session is bound and the connection is still open.
	fn is_live(&mut self) -> bool;

	/// Close the session. Errors are of no interest to anyone at this point
	/// and are only logged.
	async fn unbind(&mut self);

	/// Search below (or at) `base`.
	async fn search(
		&mut self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: &[String],
	) -> Result<SearchResponse, Error>;

	/// Apply modifications to a single entry.
	async fn modify(&mut self, dn: &str, changes: Vec<Modification>) -> Result<Outcome, Error>;

	/// Rename an entry and move it below `new_superior`.
	async fn modify_dn(
		&mut self,
		dn: &str,
		new_rdn: &str,
		new_superior: Option<&str>,
	) -> Result<Outcome, Error>;
}

/// Opens unbound sessions to the configured server.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
	/// Establish the transport. Binding is left to the caller.
	async fn connect(&self, config: &Config) -> Result<Box<dyn Session>, Error>;
}

/// [`Backend`] talking to a real server through [`ldap3`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapBackend;

#[async_trait]
impl Backend for LdapBackend {
	async fn connect(&self, config: &Config) -> Result<Box<dyn Session>, Error> {
		let url = config.url()?;
		let settings = config.connection.to_settings()?;
		debug!("Connecting to {url}");
		let (conn, ldap) = LdapConnAsync::with_settings(settings, url.as_str()).await?;
		let driver = tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});
		Ok(Box::new(LdapSession {
			ldap,
			bound: false,
			operation_timeout: config.connection.operation_timeout,
			driver,
		}))
	}
}

/// A [`Session`] backed by an [`ldap3::Ldap`] handle.
#[derive(Debug)]
pub struct LdapSession {
	/// The handle used to issue operations.
	ldap: ldap3::Ldap,
	/// Set after a successful bind.
	bound: bool,
	/// Applied to every operation, if set.
	operation_timeout: Option<std::time::Duration>,
	/// Task driving the connection.
	driver: tokio::task::JoinHandle<()>,
}

impl LdapSession {
	/// The handle, with the operation timeout applied to the next request.
	fn ldap(&mut self) -> &mut ldap3::Ldap {
		if let Some(timeout) = self.operation_timeout {
			self.ldap.with_timeout(timeout);
		}
		&mut self.ldap
	}
}

#[async_trait]
impl Session for LdapSession {
	async fn bind(&mut self, user: &str, password: &str) -> Result<Outcome, Error> {
		let outcome = Outcome::from(self.ldap().simple_bind(user, password).await?);
		self.bound = outcome.is_success();
		Ok(outcome)
	}

	fn is_live(&mut self) -> bool {
		self.bound && !self.driver.is_finished() && !self.ldap.is_closed()
	}

	async fn unbind(&mut self) {
		self.bound = false;
		if let Err(err) = self.ldap.unbind().await {
			debug!("Unbinding a stale connection failed: {err}");
		}
		self.driver.abort();
	}

	async fn search(
		&mut self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: &[String],
	) -> Result<SearchResponse, Error> {
		let ldap3::SearchResult(entries, result) =
			self.ldap().search(base, scope, filter, attributes.to_vec()).await?;
		Outcome::from(result).into_result()?;

		let items = entries
			.into_iter()
			.filter(|entry| !entry.is_intermediate())
			.map(|entry| {
				if entry.is_ref() {
					ResponseItem::Referral(parse_refs(entry.0))
				} else {
					ResponseItem::Entry(SearchEntry::construct(entry))
				}
			})
			.collect();
		Ok(SearchResponse { items })
	}

	async fn modify(&mut self, dn: &str, changes: Vec<Modification>) -> Result<Outcome, Error> {
		let mods = changes.into_iter().map(Modification::into_mod).collect();
		Ok(self.ldap().modify(dn, mods).await?.into())
	}

	async fn modify_dn(
		&mut self,
		dn: &str,
		new_rdn: &str,
		new_superior: Option<&str>,
	) -> Result<Outcome, Error> {
		Ok(self.ldap().modifydn(dn, new_rdn, true, new_superior).await?.into())
	}
}

//! Owner of the single, lazily bound directory connection.
use ldap3::Scope;
use tracing::{debug, info, warn};

use crate::{
	config::Config,
	directory::{Backend, Session},
	entry::SearchEntryExt,
	error::Error,
};

/// Root DSE attribute naming the domain partition.
const DEFAULT_NAMING_CONTEXT: &str = "defaultNamingContext";

/// Keeps at most one live session and rebinds it whenever it has gone stale.
///
/// Actions are serialized through `&mut self`. A host that runs actions
/// concurrently has to put the manager behind a mutex or use one manager per
/// task.
#[derive(Debug)]
pub struct ConnectionManager {
	/// Server address and credentials.
	config: Config,
	/// Opens new sessions.
	backend: Box<dyn Backend>,
	/// The current session, if one was ever established.
	session: Option<Box<dyn Session>>,
	/// `defaultNamingContext` read from the root DSE right after the bind of
	/// the current session.
	naming_context: Option<String>,
}

impl ConnectionManager {
	/// Create a manager. No connection is made until one is needed.
	#[must_use]
	pub fn new(config: Config, backend: Box<dyn Backend>) -> Self {
		Self { config, backend, session: None, naming_context: None }
	}

	/// The configuration connections are made with.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Whether a bound, open session is currently held.
	pub fn is_live(&mut self) -> bool {
		self.session.as_mut().is_some_and(|session| session.is_live())
	}

	/// Make sure a bound session exists, connecting and binding if the current
	/// one is missing or stale. Cheap when the session is live.
	pub async fn ensure_connection(&mut self) -> Result<(), Error> {
		if self.is_live() {
			return Ok(());
		}
		if let Some(mut stale) = self.session.take() {
			debug!("Discarding stale directory connection");
			self.naming_context = None;
			stale.unbind().await;
		}

		info!(
			"Connecting to directory server {}:{} (tls: {})",
			self.config.server, self.config.ssl_port, self.config.force_ssl
		);
		let mut session = self.backend.connect(&self.config).await?;
		let outcome = session.bind(&self.config.username, &self.config.password).await?;
		if !outcome.is_success() {
			warn!("Bind as {} refused: {} {}", self.config.username, outcome.code, outcome.text);
			let description = if outcome.text.is_empty() {
				outcome.description().to_owned()
			} else {
				format!("{} ({})", outcome.description(), outcome.text)
			};
			return Err(Error::Connection(description));
		}

		debug!("Bound to directory as {}", self.config.username);
		self.naming_context = read_naming_context(session.as_mut()).await;
		self.session = Some(session);
		Ok(())
	}

	/// The live session, binding first if necessary.
	pub async fn session(&mut self) -> Result<&mut dyn Session, Error> {
		self.ensure_connection().await?;
		match self.session.as_deref_mut() {
			Some(session) => Ok(session),
			None => Err(Error::Connection("no session after bind".to_owned())),
		}
	}

	/// The default naming context advertised in the root DSE when the current
	/// session was bound, or `None` if it could not be read for any reason,
	/// including failing to connect.
	pub async fn root_naming_context(&mut self) -> Option<String> {
		if let Err(err) = self.ensure_connection().await {
			debug!("Cannot read the root DSE: {err}");
			return None;
		}
		self.naming_context.clone()
	}

	/// Unbind and drop the current session, if any.
	pub async fn close(&mut self) {
		self.naming_context = None;
		if let Some(mut session) = self.session.take() {
			session.unbind().await;
		}
	}
}

/// Read the default naming context from the root DSE of a freshly bound
/// session.
async fn read_naming_context(session: &mut dyn Session) -> Option<String> {
	let attributes = [DEFAULT_NAMING_CONTEXT.to_owned()];
	match session.search("", Scope::Base, "(objectClass=*)", &attributes).await {
		Ok(response) => {
			let context = response
				.entries()
				.find_map(|entry| entry.attr_first(DEFAULT_NAMING_CONTEXT))
				.map(str::to_owned);
			if context.is_none() {
				debug!("Root DSE has no {DEFAULT_NAMING_CONTEXT}");
			}
			context
		}
		Err(err) => {
			debug!("Reading the root DSE failed: {err}");
			None
		}
	}
}

//! Subtree searches and read-back of the last response.
use ldap3::Scope;
use tracing::debug;

use crate::{
	connection::ConnectionManager,
	directory::{DirectoryRecord, ResponseItem, SearchResponse},
	error::Error,
};

/// Runs searches and remembers the most recent response.
#[derive(Debug, Default)]
pub struct QueryEngine {
	/// Response of the last search, cleared when a search starts.
	last_response: Option<SearchResponse>,
}

impl QueryEngine {
	/// Create an engine with no previous response.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Search the subtree below `search_base`, or below the default naming
	/// context if no base is given. Fails if no connection can be
	/// established.
	pub async fn query(
		&mut self,
		connection: &mut ConnectionManager,
		filter: &str,
		attributes: &[String],
		search_base: Option<&str>,
	) -> Result<&SearchResponse, Error> {
		self.last_response = None;
		connection.ensure_connection().await?;

		let base = match search_base {
			Some(base) => base.to_owned(),
			None => connection.root_naming_context().await.ok_or_else(|| {
				Error::Missing("defaultNamingContext of the root DSE".to_owned())
			})?,
		};

		debug!("Searching {base} for {filter} ({})", attributes.join(";"));
		let session = connection.session().await?;
		let response = session.search(&base, Scope::Subtree, filter, attributes).await?;
		debug!("Search returned {} item(s)", response.items.len());
		Ok(self.last_response.insert(response))
	}

	/// The entries of the last search response, without referrals. Empty if
	/// there is no response to read.
	#[must_use]
	pub fn filtered_response(&self) -> Vec<DirectoryRecord> {
		let Some(response) = &self.last_response else {
			debug!("No search response to read back");
			return Vec::new();
		};
		response
			.items
			.iter()
			.filter_map(|item| match item {
				ResponseItem::Entry(entry) => Some(entry.clone()),
				ResponseItem::Referral(_) => None,
			})
			.collect()
	}
}

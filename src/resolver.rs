//! Batch resolution of account names to distinguished names.
use ldap3::ldap_escape;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
	connection::ConnectionManager, entry::SearchEntryExt, error::Error, query::QueryEngine,
	result::ActionResult,
};

/// Attribute holding the short-form (pre-Windows 2000) account name.
pub const SHORT_FORM_ATTRIBUTE: &str = "sAMAccountName";
/// Attribute holding the canonical identifier of an object.
pub const CANONICAL_ATTRIBUTE: &str = "distinguishedName";

/// Short-form identifiers mapped to their canonical identifier, or to `None`
/// where nothing was found. Keeps the order the identifiers were requested in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMap {
	/// `(short form, canonical identifier)` pairs, one per distinct input.
	entries: Vec<(String, Option<String>)>,
}

impl IdentifierMap {
	/// Seed a map with every short form unresolved. Duplicates are dropped.
	fn unresolved(short_forms: &[String]) -> Self {
		let mut entries: Vec<(String, Option<String>)> = Vec::with_capacity(short_forms.len());
		for short_form in short_forms {
			if !entries.iter().any(|(known, _)| known == short_form) {
				entries.push((short_form.clone(), None));
			}
		}
		Self { entries }
	}

	/// Record the canonical identifier for every requested short form that
	/// matches `short_form`. Already resolved identifiers are left alone.
	fn resolve(&mut self, short_form: &str, canonical: &str) {
		for (requested, resolved) in &mut self.entries {
			if resolved.is_none() && requested.eq_ignore_ascii_case(short_form) {
				*resolved = Some(canonical.to_owned());
			}
		}
	}

	/// The canonical identifier of `short_form`, if it was found.
	#[must_use]
	pub fn get(&self, short_form: &str) -> Option<&str> {
		self.entries
			.iter()
			.find(|(requested, _)| requested == short_form)
			.and_then(|(_, resolved)| resolved.as_deref())
	}

	/// Iterate over all `(short form, canonical identifier)` pairs.
	pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
		self.entries.iter().map(|(requested, resolved)| (requested.as_str(), resolved.as_deref()))
	}

	/// Number of distinct short forms requested.
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether nothing was requested.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// The distinct canonical identifiers that were found, in request order.
	/// Account names differing only in case resolve to the same entry and are
	/// returned once.
	#[must_use]
	pub fn resolved(&self) -> Vec<String> {
		dedup_ignore_case(self.entries.iter().filter_map(|(_, resolved)| resolved.clone()))
	}

	/// The short forms that were not found, in request order.
	#[must_use]
	pub fn not_found(&self) -> Vec<String> {
		self.entries
			.iter()
			.filter(|(_, resolved)| resolved.is_none())
			.map(|(requested, _)| requested.clone())
			.collect()
	}
}

/// Drop values equal to an earlier one when compared case-insensitively, the
/// way the directory compares distinguished names. Keeps the first spelling.
pub fn dedup_ignore_case(values: impl IntoIterator<Item = String>) -> Vec<String> {
	let mut distinct: Vec<String> = Vec::new();
	for value in values {
		if !distinct.iter().any(|known| known.eq_ignore_ascii_case(&value)) {
			distinct.push(value);
		}
	}
	distinct
}

/// Resolve a batch of account names with a single search from the root of
/// the directory.
///
/// When a result is given, the number of requested and found identifiers and
/// the names not found are added to its summary. Counts accumulate, so an
/// action resolving several batches reports the totals.
pub async fn resolve_identifiers(
	connection: &mut ConnectionManager,
	engine: &mut QueryEngine,
	short_forms: &[String],
	result: Option<&mut ActionResult>,
) -> Result<IdentifierMap, Error> {
	let mut map = IdentifierMap::unresolved(short_forms);

	if !map.is_empty() {
		let filter: String = map
			.entries
			.iter()
			.map(|(short_form, _)| format!("({SHORT_FORM_ATTRIBUTE}={})", ldap_escape(short_form)))
			.collect();
		let attributes = [CANONICAL_ATTRIBUTE.to_owned(), SHORT_FORM_ATTRIBUTE.to_owned()];
		engine.query(connection, &format!("(|{filter})"), &attributes, None).await?;

		for record in engine.filtered_response() {
			let Some(short_form) = record.attr_first(SHORT_FORM_ATTRIBUTE) else {
				continue;
			};
			let canonical = record.attr_first(CANONICAL_ATTRIBUTE).unwrap_or(record.dn.as_str());
			map.resolve(short_form, canonical);
		}
	}

	let not_found = map.not_found();
	let found = map.len() - not_found.len();
	debug!("Resolved {found} of {} account name(s)", map.len());
	if !not_found.is_empty() {
		info!("Account name(s) not found: {}", not_found.join(", "));
	}

	if let Some(result) = result {
		result.add_to_summary("requested_records", map.len());
		result.add_to_summary("found_records", found);
		if !not_found.is_empty() {
			let mut names = match result.summary().get("not_found") {
				Some(Value::Array(names)) => names.clone(),
				_ => Vec::new(),
			};
			names.extend(not_found.into_iter().map(Value::from));
			result.set_summary("not_found", names);
		}
	}

	Ok(map)
}

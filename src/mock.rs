//! In-memory directory used by the unit tests.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_docs_in_private_items)]

use std::{
	collections::HashMap,
	io,
	sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use ldap3::{LdapError, Scope, SearchEntry};

use crate::{
	config::{Config, ConnectionConfig},
	directory::{
		Backend, ModifyOperation, Modification, Outcome, ResponseItem, SearchResponse, Session,
	},
	error::Error,
};

pub(crate) const ROOT: &str = "DC=example,DC=com";
pub(crate) const ALICE: &str = "CN=Alice Smith,OU=Staff,DC=example,DC=com";
pub(crate) const BOB: &str = "CN=Bob Jones,OU=Staff,DC=example,DC=com";
pub(crate) const CAROL: &str = "CN=Carol White,OU=Staff,DC=example,DC=com";
pub(crate) const HELPDESK: &str = "CN=Helpdesk,OU=Groups,DC=example,DC=com";
pub(crate) const VPN_USERS: &str = "CN=VPN Users,OU=Groups,DC=example,DC=com";
const BIND_USER: &str = "EXAMPLE\\svc-soar";
const BIND_PASSWORD: &str = "correct horse";
pub(crate) const REFERRAL: &str =
	"ldap://ForestDnsZones.example.com/DC=ForestDnsZones,DC=example,DC=com";

#[derive(Debug, Default)]
struct State {
	entries: Vec<SearchEntry>,
	referrals: Vec<String>,
	generation: u64,
	unreachable: bool,
	reject: Option<Outcome>,
	connects: usize,
	binds: usize,
	unbinds: usize,
	searches: usize,
	modifications: Vec<(String, Modification)>,
	renames: Vec<(String, String, Option<String>)>,
}

/// Shared handle on the fake directory; clones observe the same state.
#[derive(Debug, Clone)]
pub(crate) struct MockDirectory {
	state: Arc<Mutex<State>>,
}

impl MockDirectory {
	/// A directory with three users, two groups and a forest referral.
	pub(crate) fn new() -> Self {
		let directory = Self { state: Arc::default() };
		directory.add_entry(ROOT, &[("objectClass", &["domain"])]);
		for ou in ["OU=Staff", "OU=Groups", "OU=Leavers"] {
			directory
				.add_entry(&format!("{ou},{ROOT}"), &[("objectClass", &["organizationalUnit"])]);
		}
		directory.add_entry(
			ALICE,
			&[
				("objectClass", &["user"]),
				("sAMAccountName", &["alice"]),
				("userPrincipalName", &["alice@example.com"]),
				("mail", &["alice@example.com"]),
				("userAccountControl", &["66048"]),
			],
		);
		directory.add_entry(
			BOB,
			&[
				("objectClass", &["user"]),
				("sAMAccountName", &["bob"]),
				("userPrincipalName", &["bob@example.com"]),
				("mail", &["bob@example.com"]),
				("userAccountControl", &["512"]),
			],
		);
		directory.add_entry(
			CAROL,
			&[
				("objectClass", &["user"]),
				("sAMAccountName", &["carol"]),
				("userAccountControl", &["514"]),
				("lockoutTime", &["133400000000000000"]),
			],
		);
		directory.add_entry(
			HELPDESK,
			&[("objectClass", &["group"]), ("sAMAccountName", &["helpdesk"]), ("member", &[CAROL])],
		);
		directory.add_entry(
			VPN_USERS,
			&[("objectClass", &["group"]), ("sAMAccountName", &["vpn-users"])],
		);
		directory.state().referrals.push(REFERRAL.to_owned());
		directory
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().expect("mock directory state poisoned")
	}

	pub(crate) fn add_entry(&self, dn: &str, attrs: &[(&str, &[&str])]) {
		let mut attrs: HashMap<String, Vec<String>> = attrs
			.iter()
			.map(|(name, values)| {
				((*name).to_owned(), values.iter().map(|v| (*v).to_owned()).collect())
			})
			.collect();
		attrs.insert("distinguishedName".to_owned(), vec![dn.to_owned()]);
		self.state().entries.push(SearchEntry {
			dn: dn.to_owned(),
			attrs,
			bin_attrs: HashMap::new(),
		});
	}

	pub(crate) fn config(&self) -> Config {
		Config {
			server: "dc01.example.com".to_owned(),
			username: BIND_USER.to_owned(),
			password: BIND_PASSWORD.to_owned(),
			force_ssl: true,
			ssl_port: 636,
			connection: ConnectionConfig::default(),
		}
	}

	pub(crate) fn backend(&self) -> Box<dyn Backend> {
		Box::new(MockBackend { directory: self.clone() })
	}

	/// Break every open session, as a server-side idle timeout would.
	pub(crate) fn sever(&self) {
		self.state().generation += 1;
	}

	pub(crate) fn set_unreachable(&self, unreachable: bool) {
		self.state().unreachable = unreachable;
	}

	/// Make every following modification fail with the given outcome.
	pub(crate) fn reject_modifications(&self, code: u32, text: &str) {
		self.state().reject = Some(Outcome { code, text: text.to_owned() });
	}

	pub(crate) fn values(&self, dn: &str, attr: &str) -> Option<Vec<String>> {
		let state = self.state();
		let entry = state.entries.iter().find(|e| e.dn.eq_ignore_ascii_case(dn))?;
		entry
			.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.clone())
	}

	pub(crate) fn exists(&self, dn: &str) -> bool {
		self.state().entries.iter().any(|e| e.dn.eq_ignore_ascii_case(dn))
	}

	pub(crate) fn connects(&self) -> usize {
		self.state().connects
	}

	pub(crate) fn binds(&self) -> usize {
		self.state().binds
	}

	pub(crate) fn unbinds(&self) -> usize {
		self.state().unbinds
	}

	/// Number of searches issued, root DSE reads included.
	pub(crate) fn searches(&self) -> usize {
		self.state().searches
	}

	/// Number of write operations (modify and modify-DN) issued.
	pub(crate) fn writes(&self) -> usize {
		let state = self.state();
		state.modifications.len() + state.renames.len()
	}

	pub(crate) fn modifications(&self) -> Vec<(String, Modification)> {
		self.state().modifications.clone()
	}

	pub(crate) fn renames(&self) -> Vec<(String, String, Option<String>)> {
		self.state().renames.clone()
	}
}

#[derive(Debug)]
struct MockBackend {
	directory: MockDirectory,
}

#[async_trait]
impl Backend for MockBackend {
	async fn connect(&self, config: &Config) -> Result<Box<dyn Session>, Error> {
		let mut state = self.directory.state();
		if state.unreachable {
			return Err(LdapError::from(io::Error::new(
				io::ErrorKind::ConnectionRefused,
				format!("connect to {}:{} refused", config.server, config.ssl_port),
			))
			.into());
		}
		state.connects += 1;
		Ok(Box::new(MockSession {
			directory: self.directory.clone(),
			generation: state.generation,
			bound: false,
		}))
	}
}

#[derive(Debug)]
struct MockSession {
	directory: MockDirectory,
	generation: u64,
	bound: bool,
}

impl MockSession {
	fn check_open(&self) -> Result<MutexGuard<'_, State>, Error> {
		let state = self.directory.state();
		if state.generation != self.generation || state.unreachable {
			return Err(LdapError::EndOfStream.into());
		}
		Ok(state)
	}
}

#[async_trait]
impl Session for MockSession {
	async fn bind(&mut self, user: &str, password: &str) -> Result<Outcome, Error> {
		self.check_open()?.binds += 1;
		self.bound = user == BIND_USER && password == BIND_PASSWORD;
		if self.bound {
			Ok(Outcome::success())
		} else {
			Ok(Outcome {
				code: 49,
				text: "80090308: LdapErr: DSID-0C09044E, comment: AcceptSecurityContext error, \
				       data 52e, v4563"
					.to_owned(),
			})
		}
	}

	fn is_live(&mut self) -> bool {
		self.bound && self.directory.state().generation == self.generation
	}

	async fn unbind(&mut self) {
		self.bound = false;
		self.directory.state().unbinds += 1;
	}

	async fn search(
		&mut self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: &[String],
	) -> Result<SearchResponse, Error> {
		let mut state = self.check_open()?;
		state.searches += 1;
		if base.is_empty() {
			let root_dse = SearchEntry {
				dn: String::new(),
				attrs: HashMap::from([(
					"defaultNamingContext".to_owned(),
					vec![ROOT.to_owned()],
				)]),
				bin_attrs: HashMap::new(),
			};
			return Ok(SearchResponse { items: vec![ResponseItem::Entry(root_dse)] });
		}

		let filter =
			parse_filter(filter).ok_or_else(|| Error::Invalid(format!("filter {filter}")))?.0;
		if !state.entries.iter().any(|e| e.dn.eq_ignore_ascii_case(base)) {
			return Err(Error::operation(32, "0000208D: NameErr: DSID-0310028D, problem 2001"));
		}

		let suffix = format!(",{}", base.to_ascii_lowercase());
		let mut items: Vec<ResponseItem> = state
			.entries
			.iter()
			.filter(|entry| {
				let dn = entry.dn.to_ascii_lowercase();
				match scope {
					Scope::Base => dn == base.to_ascii_lowercase(),
					Scope::OneLevel => {
						dn.strip_suffix(&suffix).is_some_and(|rdn| !rdn.contains(','))
					}
					Scope::Subtree => dn == base.to_ascii_lowercase() || dn.ends_with(&suffix),
				}
			})
			.filter(|entry| filter.matches(entry))
			.map(|entry| ResponseItem::Entry(project(entry, attributes)))
			.collect();
		if matches!(scope, Scope::Subtree) && base.eq_ignore_ascii_case(ROOT) {
			let referrals = state.referrals.iter();
			items.extend(referrals.map(|uri| ResponseItem::Referral(vec![uri.clone()])));
		}
		Ok(SearchResponse { items })
	}

	async fn modify(&mut self, dn: &str, changes: Vec<Modification>) -> Result<Outcome, Error> {
		let mut state = self.check_open()?;
		for change in &changes {
			state.modifications.push((dn.to_owned(), change.clone()));
		}
		if let Some(reject) = state.reject.clone() {
			return Ok(reject);
		}
		let Some(entry) = state.entries.iter_mut().find(|e| e.dn.eq_ignore_ascii_case(dn)) else {
			return Ok(Outcome { code: 32, text: format!("no such object {dn}") });
		};
		for change in changes {
			let values: Vec<String> =
				change.values.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect();
			let name = entry
				.attrs
				.keys()
				.find(|name| name.eq_ignore_ascii_case(&change.attribute))
				.cloned()
				.unwrap_or(change.attribute);
			match change.operation {
				ModifyOperation::Add => {
					let current = entry.attrs.entry(name).or_default();
					for value in values {
						if current.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
							return Ok(Outcome { code: 20, text: format!("{value} exists") });
						}
						current.push(value);
					}
				}
				ModifyOperation::Delete if values.is_empty() => {
					entry.attrs.remove(&name);
				}
				ModifyOperation::Delete => {
					let current = entry.attrs.entry(name).or_default();
					for value in values {
						let position = current.iter().position(|v| v.eq_ignore_ascii_case(&value));
						let Some(index) = position else {
							return Ok(Outcome { code: 16, text: format!("{value} not present") });
						};
						current.remove(index);
					}
				}
				ModifyOperation::Replace => {
					entry.attrs.insert(name, values);
				}
			}
		}
		Ok(Outcome::success())
	}

	async fn modify_dn(
		&mut self,
		dn: &str,
		new_rdn: &str,
		new_superior: Option<&str>,
	) -> Result<Outcome, Error> {
		let mut state = self.check_open()?;
		state.renames.push((dn.to_owned(), new_rdn.to_owned(), new_superior.map(str::to_owned)));
		if let Some(reject) = state.reject.clone() {
			return Ok(reject);
		}
		let Some(entry) = state.entries.iter_mut().find(|e| e.dn.eq_ignore_ascii_case(dn)) else {
			return Ok(Outcome { code: 32, text: format!("no such object {dn}") });
		};
		let parent = match new_superior {
			Some(parent) => parent.to_owned(),
			None => {
				entry.dn.split_once(',').map(|(_, parent)| parent.to_owned()).unwrap_or_default()
			}
		};
		entry.dn = format!("{new_rdn},{parent}");
		entry.attrs.insert("distinguishedName".to_owned(), vec![entry.dn.clone()]);
		Ok(Outcome::success())
	}
}

/// Keep only the requested attributes of an entry.
fn project(entry: &SearchEntry, attributes: &[String]) -> SearchEntry {
	if attributes.is_empty() || attributes.iter().any(|a| a == "*") {
		return entry.clone();
	}
	SearchEntry {
		dn: entry.dn.clone(),
		attrs: entry
			.attrs
			.iter()
			.filter(|(name, _)| attributes.iter().any(|a| a.eq_ignore_ascii_case(name)))
			.map(|(name, values)| (name.clone(), values.clone()))
			.collect(),
		bin_attrs: HashMap::new(),
	}
}

/// The subset of RFC 4515 the tests need.
#[derive(Debug)]
enum Filter {
	And(Vec<Filter>),
	Or(Vec<Filter>),
	Not(Box<Filter>),
	Equal(String, String),
	Present(String),
}

impl Filter {
	fn matches(&self, entry: &SearchEntry) -> bool {
		let values = |attr: &str| {
			entry
				.attrs
				.iter()
				.find(|(name, _)| name.eq_ignore_ascii_case(attr))
				.map(|(_, values)| values.as_slice())
				.unwrap_or_default()
		};
		match self {
			Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
			Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
			Filter::Not(filter) => !filter.matches(entry),
			Filter::Equal(attr, value) => {
				values(attr).iter().any(|v| v.eq_ignore_ascii_case(value))
			}
			Filter::Present(attr) => !values(attr).is_empty(),
		}
	}
}

fn parse_filter(input: &str) -> Option<(Filter, &str)> {
	let rest = input.strip_prefix('(')?;
	match rest.chars().next()? {
		op @ ('&' | '|') => {
			let mut rest = &rest[1..];
			let mut filters = Vec::new();
			while !rest.starts_with(')') {
				let (filter, remainder) = parse_filter(rest)?;
				filters.push(filter);
				rest = remainder;
			}
			let filter = if op == '&' { Filter::And(filters) } else { Filter::Or(filters) };
			Some((filter, &rest[1..]))
		}
		'!' => {
			let (filter, rest) = parse_filter(&rest[1..])?;
			Some((Filter::Not(Box::new(filter)), rest.strip_prefix(')')?))
		}
		_ => {
			let end = rest.find(')')?;
			let (attr, value) = rest[..end].split_once('=')?;
			let filter = if value == "*" {
				Filter::Present(attr.to_owned())
			} else {
				Filter::Equal(attr.to_owned(), unescape(value))
			};
			Some((filter, &rest[end + 1..]))
		}
	}
}

/// Undo `\xx` escapes in an assertion value.
fn unescape(value: &str) -> String {
	let mut out = Vec::with_capacity(value.len());
	let bytes = value.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'\\' {
			if let Some(byte) =
				value.get(i + 1..i + 3).and_then(|hex| u8::from_str_radix(hex, 16).ok())
			{
				out.push(byte);
				i += 3;
				continue;
			}
		}
		out.push(bytes[i]);
		i += 1;
	}
	String::from_utf8_lossy(&out).into_owned()
}

//! Client that runs actions against an Active Directory server

use ldap3::ldap_escape;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::{
	action::{
		split_list, AccountParameters, Action, GetAttributesParameters, GroupMembersParameters,
		MoveObjectParameters, QueryParameters, ResetPasswordParameters, SetAttributeParameters,
	},
	config::Config,
	connection::ConnectionManager,
	directory::{first_rdn, Backend, LdapBackend, ModifyOperation, Modification},
	entry::SearchEntryExt,
	error::Error,
	extend::{self, ACCOUNT_CONTROL_ATTRIBUTE},
	query::QueryEngine,
	resolver::{dedup_ignore_case, resolve_identifiers, CANONICAL_ATTRIBUTE},
	result::{ActionParameters, ActionResult},
};

/// Message for a query that could not reach the server.
const UNREACHABLE_SERVER: &str =
	"Invalid server address. Two common causes: invalid Server hostname or search_base";

/// Receives human-readable progress messages while an action runs.
pub type ProgressCallback = Box<dyn Fn(&str) + Send + Sync>;

/// State the host persists between runs. Never interpreted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub Map<String, Value>);

/// Holds the connection and runs actions over it, one at a time.
pub struct AdLdap {
	/// The single directory connection.
	connection: ConnectionManager,
	/// Search engine, holding the last response.
	engine: QueryEngine,
	/// State handed back to the host by [`AdLdap::finalize`].
	state: State,
	/// Where progress messages go besides the log.
	progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for AdLdap {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AdLdap")
			.field("connection", &self.connection)
			.field("engine", &self.engine)
			.field("state", &self.state)
			.field("progress", &self.progress.is_some())
			.finish()
	}
}

/// Which way a group membership action goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MembershipEdit {
	/// `add_group_members`
	Add,
	/// `remove_group_members`
	Remove,
}

impl AdLdap {
	/// Create a client for the configured server with the state saved by a
	/// previous run. No connection is made until an action needs one.
	#[must_use]
	pub fn new(config: Config, state: State) -> Self {
		Self::with_backend(config, state, Box::new(LdapBackend))
	}

	/// Create a client that opens its sessions through `backend`.
	#[must_use]
	pub fn with_backend(config: Config, state: State, backend: Box<dyn Backend>) -> Self {
		Self {
			connection: ConnectionManager::new(config, backend),
			engine: QueryEngine::new(),
			state,
			progress: None,
		}
	}

	/// Also send progress messages to `callback`.
	#[must_use]
	pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
		self.progress = Some(callback);
		self
	}

	/// The persisted state.
	#[must_use]
	pub fn state(&self) -> &State {
		&self.state
	}

	/// The persisted state, for the host to update.
	pub fn state_mut(&mut self) -> &mut State {
		&mut self.state
	}

	/// Unbind the connection, if any, and return the state to persist.
	pub async fn finalize(mut self) -> State {
		self.connection.close().await;
		self.state
	}

	/// Report progress to the log and the host.
	fn save_progress(&self, message: &str) {
		info!("{message}");
		if let Some(progress) = &self.progress {
			progress(message);
		}
	}

	/// Run the action called `name`. Never fails: unknown actions, bad
	/// parameters and directory errors all end up in an error result.
	pub async fn handle_action(
		&mut self,
		name: &str,
		parameters: &ActionParameters,
	) -> ActionResult {
		debug!("Action {name} invoked");
		match Action::parse(name, parameters) {
			Ok(action) => self.handle(&action, parameters).await,
			Err(err) => {
				warn!("Cannot run action {name}: {err}");
				ActionResult::new(parameters).failure(err)
			}
		}
	}

	/// Run a decoded action. `parameters` are echoed in the result.
	pub async fn handle(&mut self, action: &Action, parameters: &ActionParameters) -> ActionResult {
		let mut result = ActionResult::new(parameters);
		self.save_progress(&format!("In action handler for: {}", action.name()));

		let outcome = match action {
			Action::TestConnectivity => self.test_connectivity().await,
			Action::Query(parameters) => self.query(parameters, &mut result).await,
			Action::GetAttributes(parameters) => self.get_attributes(parameters, &mut result).await,
			Action::AddGroupMembers(parameters) => {
				self.group_members(parameters, MembershipEdit::Add, &mut result).await
			}
			Action::RemoveGroupMembers(parameters) => {
				self.group_members(parameters, MembershipEdit::Remove, &mut result).await
			}
			Action::UnlockAccount(parameters) => self.unlock_account(parameters, &mut result).await,
			Action::DisableAccount(parameters) => {
				self.account_status(parameters, true, &mut result).await
			}
			Action::EnableAccount(parameters) => {
				self.account_status(parameters, false, &mut result).await
			}
			Action::MoveObject(parameters) => self.move_object(parameters, &mut result).await,
			Action::SetAttribute(parameters) => self.set_attribute(parameters, &mut result).await,
			Action::ResetPassword(parameters) => self.reset_password(parameters, &mut result).await,
		};

		match outcome {
			Ok(message) => {
				info!("{} succeeded: {message}", action.name());
				result.success_with_message(message)
			}
			Err(err) if err.is_transport() && matches!(action, Action::Query(_)) => {
				warn!("{} failed: {err}", action.name());
				result.failure_with_message(UNREACHABLE_SERVER, err)
			}
			Err(err) => {
				warn!("{} failed: {err}", action.name());
				result.failure(err)
			}
		}
	}

	/// The distinguished name of the account, resolving an account name
	/// first if asked to.
	async fn account_dn(
		&mut self,
		account: &AccountParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		if !account.use_samaccountname {
			return Ok(account.user.clone());
		}
		let names = [account.user.clone()];
		let map =
			resolve_identifiers(&mut self.connection, &mut self.engine, &names, Some(result))
				.await?;
		map.get(&account.user)
			.map(str::to_owned)
			.ok_or_else(|| Error::Resolution(vec![account.user.clone()]))
	}

	/// Bind with the configured credentials.
	async fn test_connectivity(&mut self) -> Result<String, Error> {
		let server = self.connection.config().url()?;
		self.save_progress(&format!("Connecting to {server}"));
		self.save_progress("Binding to directory...");
		match self.connection.ensure_connection().await {
			Ok(()) => {
				self.save_progress("Test Connectivity Passed");
				Ok("Test Connectivity Passed".to_owned())
			}
			Err(err) => {
				self.save_progress("Test Connectivity Failed.");
				Err(err)
			}
		}
	}

	/// Run a raw search.
	async fn query(
		&mut self,
		parameters: &QueryParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		let attributes = split_list(&parameters.attributes);
		let search_base =
			parameters.search_base.as_deref().map(str::trim).filter(|b| !b.is_empty());
		let response = self
			.engine
			.query(&mut self.connection, &parameters.filter, &attributes, search_base)
			.await?;
		result.add_data(Value::Object(response.to_record()));

		let total = self.engine.filtered_response().len();
		result.set_summary("total_records_found", total);
		Ok(format!("Total records found: {total}"))
	}

	/// Read attributes of principals given by user principal name, account
	/// name or distinguished name.
	async fn get_attributes(
		&mut self,
		parameters: &GetAttributesParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		let principals = split_list(&parameters.principals);
		if principals.is_empty() {
			return Err(Error::Invalid("no principals given".to_owned()));
		}
		let filter: String = principals
			.iter()
			.map(|principal| {
				let principal = ldap_escape(principal);
				format!(
					"(userPrincipalName={principal})(sAMAccountName={principal})\
					 ({CANONICAL_ATTRIBUTE}={principal})"
				)
			})
			.collect();
		let attributes = split_list(&parameters.attributes);
		let response = self
			.engine
			.query(&mut self.connection, &format!("(|{filter})"), &attributes, None)
			.await?;
		result.add_data(Value::Object(response.to_record()));

		let total = self.engine.filtered_response().len();
		result.set_summary("total_objects", total);
		Ok(format!("Total objects: {total}"))
	}

	/// Add members to or remove them from groups.
	async fn group_members(
		&mut self,
		parameters: &GroupMembersParameters,
		edit: MembershipEdit,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		let mut members = dedup_ignore_case(split_list(&parameters.members));
		let mut groups = dedup_ignore_case(split_list(&parameters.groups));
		if members.is_empty() || groups.is_empty() {
			return Err(Error::Invalid("both members and groups are required".to_owned()));
		}
		self.connection.ensure_connection().await?;

		if parameters.use_samaccountname {
			let member_map = resolve_identifiers(
				&mut self.connection,
				&mut self.engine,
				&members,
				Some(&mut *result),
			)
			.await?;
			let group_map = resolve_identifiers(
				&mut self.connection,
				&mut self.engine,
				&groups,
				Some(&mut *result),
			)
			.await?;
			members = member_map.resolved();
			groups = group_map.resolved();
			if members.is_empty() || groups.is_empty() {
				let mut not_found = member_map.not_found();
				not_found.extend(group_map.not_found());
				return Err(Error::Resolution(not_found));
			}
		}

		let session = self.connection.session().await?;
		let function = match edit {
			MembershipEdit::Add => {
				extend::add_members_to_groups(session, &members, &groups, true).await?;
				"added"
			}
			MembershipEdit::Remove => {
				extend::remove_members_from_groups(session, &members, &groups, true).await?;
				"removed"
			}
		};

		for member in &members {
			for group in &groups {
				result.add_data(json!({ "member": member, "group": group, "function": function }));
			}
		}
		Ok(match edit {
			MembershipEdit::Add => "Added member(s) to group(s)".to_owned(),
			MembershipEdit::Remove => "Removed member(s) from group(s)".to_owned(),
		})
	}

	/// Clear the lockout of an account.
	async fn unlock_account(
		&mut self,
		parameters: &AccountParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		self.connection.ensure_connection().await?;
		let user = self.account_dn(parameters, result).await?;
		extend::unlock_account(self.connection.session().await?, &user).await?;

		result.set_summary("result", "Unlocked");
		result.add_data(json!({ "user": user }));
		Ok("Account unlocked".to_owned())
	}

	/// Set or clear the disabled flag of an account, leaving every other
	/// account-control flag as it is.
	async fn account_status(
		&mut self,
		parameters: &AccountParameters,
		disable: bool,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		self.connection.ensure_connection().await?;
		let user = self.account_dn(parameters, result).await?;

		let filter = format!("({CANONICAL_ATTRIBUTE}={})", ldap_escape(&user));
		let attributes = [ACCOUNT_CONTROL_ATTRIBUTE.to_owned()];
		self.engine.query(&mut self.connection, &filter, &attributes, None).await?;
		let records = self.engine.filtered_response();
		let record = records.first().ok_or_else(|| Error::Resolution(vec![user.clone()]))?;
		let flags = record
			.u32_first(ACCOUNT_CONTROL_ATTRIBUTE)
			.ok_or_else(|| Error::Missing(format!("{ACCOUNT_CONTROL_ATTRIBUTE} of {user}")))??;

		let updated = extend::set_disabled(flags, disable);
		debug!("{ACCOUNT_CONTROL_ATTRIBUTE} of {user}: {flags:#x} -> {updated:#x}");
		let modification = Modification::new(
			ModifyOperation::Replace,
			ACCOUNT_CONTROL_ATTRIBUTE,
			[extend::flags_value(updated)],
		);
		self.connection.session().await?.modify(&user, vec![modification]).await?.into_result()?;

		result.add_data(json!({
			"user": user,
			"user_account_control": updated,
			"disabled": disable,
		}));
		Ok(if disable { "Account disabled" } else { "Account enabled" }.to_owned())
	}

	/// Move an object below another container, keeping its name.
	async fn move_object(
		&mut self,
		parameters: &MoveObjectParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		let rdn = first_rdn(&parameters.object)?;
		let session = self.connection.session().await?;
		session.modify_dn(&parameters.object, rdn, Some(&parameters.new_ou)).await?.into_result()?;

		let new_dn = format!("{rdn},{}", parameters.new_ou);
		info!("Moved {} to {new_dn}", parameters.object);
		result.add_data(json!({ "object": parameters.object, "new_dn": new_dn }));
		Ok(format!("Object moved to {}", parameters.new_ou))
	}

	/// Add, delete or replace one attribute value.
	async fn set_attribute(
		&mut self,
		parameters: &SetAttributeParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		let modification = Modification::new(
			parameters.action,
			&parameters.attribute,
			[parameters.value.as_str()],
		);
		let session = self.connection.session().await?;
		let outcome = session.modify(&parameters.user, vec![modification]).await?;
		result.add_data(json!({ "modified": outcome.is_success() }));
		outcome.into_result()?;

		info!("{:?} {} of {}", parameters.action, parameters.attribute, parameters.user);
		Ok(format!("Attribute {} modified", parameters.attribute))
	}

	/// Set a new password for an account.
	async fn reset_password(
		&mut self,
		parameters: &ResetPasswordParameters,
		result: &mut ActionResult,
	) -> Result<String, Error> {
		let config = self.connection.config();
		if !config.force_ssl && !config.connection.tls.starttls {
			warn!("Resetting a password over an unencrypted connection is usually refused");
		}
		let session = self.connection.session().await?;
		let outcome =
			extend::modify_password(session, &parameters.user, &parameters.password).await?;
		result.add_data(json!({ "reset": outcome.is_success() }));
		outcome.into_result()?;
		Ok("Password reset".to_owned())
	}
}

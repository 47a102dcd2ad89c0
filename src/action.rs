//! The actions a host can invoke, and the parameters each one takes.
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::{directory::ModifyOperation, error::Error, result::ActionParameters};

/// Split a semicolon-delimited parameter into its trimmed, non-empty items.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
	value.split(';').map(str::trim).filter(|item| !item.is_empty()).map(str::to_owned).collect()
}

/// Parameters of `query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryParameters {
	/// Raw search filter, passed through as is.
	pub filter: String,
	/// Semicolon-delimited attributes to return.
	pub attributes: String,
	/// Where to search from. The default naming context if absent or empty.
	#[serde(default)]
	pub search_base: Option<String>,
}

/// Parameters of `get_attributes`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetAttributesParameters {
	/// Semicolon-delimited principals: user principal names, account names
	/// or distinguished names, in any mix.
	pub principals: String,
	/// Semicolon-delimited attributes to return.
	pub attributes: String,
}

/// Parameters of `add_group_members` and `remove_group_members`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMembersParameters {
	/// Semicolon-delimited members.
	pub members: String,
	/// Semicolon-delimited groups.
	pub groups: String,
	/// Members and groups are account names rather than distinguished names.
	#[serde(default)]
	pub use_samaccountname: bool,
}

/// Parameters of the actions working on a single account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountParameters {
	/// The account.
	pub user: String,
	/// `user` is an account name rather than a distinguished name.
	#[serde(default)]
	pub use_samaccountname: bool,
}

/// Parameters of `move_object`.
#[derive(Debug, Clone, Deserialize)]
pub struct MoveObjectParameters {
	/// Distinguished name of the object to move.
	pub object: String,
	/// Distinguished name of the new parent container.
	pub new_ou: String,
}

/// Parameters of `set_attribute`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetAttributeParameters {
	/// Distinguished name of the object to change.
	pub user: String,
	/// Attribute to change.
	pub attribute: String,
	/// The value to add, delete or replace with.
	pub value: String,
	/// `ADD`, `DELETE` or `REPLACE`.
	pub action: ModifyOperation,
}

/// Parameters of `reset_password`.
#[derive(Clone, Deserialize)]
pub struct ResetPasswordParameters {
	/// Distinguished name of the account.
	pub user: String,
	/// The new password.
	pub password: String,
}

impl std::fmt::Debug for ResetPasswordParameters {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResetPasswordParameters")
			.field("user", &self.user)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// A supported action together with its decoded parameters.
#[derive(Debug, Clone)]
pub enum Action {
	/// Bind with the configured credentials.
	TestConnectivity,
	/// Run a raw search.
	Query(QueryParameters),
	/// Read attributes of principals.
	GetAttributes(GetAttributesParameters),
	/// Add members to groups.
	AddGroupMembers(GroupMembersParameters),
	/// Remove members from groups.
	RemoveGroupMembers(GroupMembersParameters),
	/// Clear an account lockout.
	UnlockAccount(AccountParameters),
	/// Set the disabled flag of an account.
	DisableAccount(AccountParameters),
	/// Clear the disabled flag of an account.
	EnableAccount(AccountParameters),
	/// Move an object to another container.
	MoveObject(MoveObjectParameters),
	/// Change one attribute value.
	SetAttribute(SetAttributeParameters),
	/// Set a new password.
	ResetPassword(ResetPasswordParameters),
}

impl Action {
	/// Decode the action called `name` from the host's parameter mapping.
	pub fn parse(name: &str, parameters: &ActionParameters) -> Result<Self, Error> {
		Ok(match name {
			"test_connectivity" => Action::TestConnectivity,
			"query" => Action::Query(decode(parameters)?),
			"get_attributes" => Action::GetAttributes(decode(parameters)?),
			"add_group_members" => Action::AddGroupMembers(decode(parameters)?),
			"remove_group_members" => Action::RemoveGroupMembers(decode(parameters)?),
			"unlock_account" => Action::UnlockAccount(decode(parameters)?),
			"disable_account" => Action::DisableAccount(decode(parameters)?),
			"enable_account" => Action::EnableAccount(decode(parameters)?),
			"move_object" => Action::MoveObject(decode(parameters)?),
			"set_attribute" => Action::SetAttribute(decode(parameters)?),
			"reset_password" => Action::ResetPassword(decode(parameters)?),
			other => return Err(Error::Invalid(format!("unsupported action {other}"))),
		})
	}

	/// The name the host invokes the action by.
	#[must_use]
	pub fn name(&self) -> &'static str {
		match self {
			Action::TestConnectivity => "test_connectivity",
			Action::Query(_) => "query",
			Action::GetAttributes(_) => "get_attributes",
			Action::AddGroupMembers(_) => "add_group_members",
			Action::RemoveGroupMembers(_) => "remove_group_members",
			Action::UnlockAccount(_) => "unlock_account",
			Action::DisableAccount(_) => "disable_account",
			Action::EnableAccount(_) => "enable_account",
			Action::MoveObject(_) => "move_object",
			Action::SetAttribute(_) => "set_attribute",
			Action::ResetPassword(_) => "reset_password",
		}
	}
}

/// Decode typed parameters. Unknown keys are ignored.
fn decode<T: DeserializeOwned>(parameters: &ActionParameters) -> Result<T, Error> {
	Ok(serde_json::from_value(Value::Object(parameters.clone()))?)
}

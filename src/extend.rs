//! Active Directory specific operations built from search and modify.
use ldap3::Scope;
use tracing::{debug, info};

use crate::{
	directory::{ModifyOperation, Modification, Outcome, Session},
	entry::SearchEntryExt,
	error::Error,
};

/// Multi-valued attribute listing the members of a group.
const MEMBER_ATTRIBUTE: &str = "member";
/// Attribute holding the account-control flags.
pub const ACCOUNT_CONTROL_ATTRIBUTE: &str = "userAccountControl";
/// The `ACCOUNTDISABLE` account-control flag.
pub const ACCOUNT_DISABLED: u32 = 0x02;

/// The account-control flags with only the disabled flag changed.
#[must_use]
pub fn set_disabled(flags: u32, disabled: bool) -> u32 {
	if disabled {
		flags | ACCOUNT_DISABLED
	} else {
		flags & !ACCOUNT_DISABLED
	}
}

/// The textual form of account-control flags. The attribute has INTEGER
/// syntax, so flags with the top bit set are written as negative numbers.
#[must_use]
pub fn flags_value(flags: u32) -> String {
	i32::from_ne_bytes(flags.to_ne_bytes()).to_string()
}

/// Encode a password for the `unicodePwd` attribute: surrounded by double
/// quotes and encoded as UTF-16LE.
#[must_use]
pub fn encode_password(password: &str) -> Vec<u8> {
	format!("\"{password}\"").encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Read the current `member` values of a group, lowercased.
async fn current_members(session: &mut dyn Session, group: &str) -> Result<Vec<String>, Error> {
	let attributes = [MEMBER_ATTRIBUTE.to_owned(), "objectClass".to_owned()];
	let response = session.search(group, Scope::Base, "(objectClass=*)", &attributes).await?;
	let entry = response
		.entries()
		.next()
		.ok_or_else(|| Error::operation(32, format!("group {group} not found")))?;
	Ok(entry
		.attr_values(MEMBER_ATTRIBUTE)
		.unwrap_or_default()
		.iter()
		.map(|member| member.to_lowercase())
		.collect())
}

/// Which way a membership edit goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MembershipChange {
	/// Add members.
	Add,
	/// Remove members.
	Remove,
}

/// Add or remove every member to or from every group, stopping at the first
/// group the directory refuses to change.
///
/// With `fix`, each group's current membership is read first: members already
/// present are not added again and members not present are not removed, so
/// the edit is idempotent. A group that cannot be read is an error.
async fn edit_memberships(
	session: &mut dyn Session,
	members: &[String],
	groups: &[String],
	fix: bool,
	change: MembershipChange,
) -> Result<(), Error> {
	for group in groups {
		let existing = if fix { Some(current_members(session, group).await?) } else { None };
		let is_member =
			|member: &String| existing.as_ref().map(|e| e.contains(&member.to_lowercase()));

		let selected: Vec<String> = members
			.iter()
			.filter(|&member| match change {
				MembershipChange::Add => is_member(member) != Some(true),
				MembershipChange::Remove => is_member(member) != Some(false),
			})
			.cloned()
			.collect();
		if selected.is_empty() {
			debug!("Membership of {group} already as requested");
			continue;
		}

		let operation = match change {
			MembershipChange::Add => ModifyOperation::Add,
			MembershipChange::Remove => ModifyOperation::Delete,
		};
		let modification = Modification::new(operation, MEMBER_ATTRIBUTE, selected.iter().cloned());
		session.modify(group, vec![modification]).await?.into_result()?;
		info!("{change:?} {} member(s) on {group}", selected.len());
	}
	Ok(())
}

/// Add every member to every group.
pub async fn add_members_to_groups(
	session: &mut dyn Session,
	members: &[String],
	groups: &[String],
	fix: bool,
) -> Result<(), Error> {
	edit_memberships(session, members, groups, fix, MembershipChange::Add).await
}

/// Remove every member from every group.
pub async fn remove_members_from_groups(
	session: &mut dyn Session,
	members: &[String],
	groups: &[String],
	fix: bool,
) -> Result<(), Error> {
	edit_memberships(session, members, groups, fix, MembershipChange::Remove).await
}

/// Clear the lockout of an account.
pub async fn unlock_account(session: &mut dyn Session, user: &str) -> Result<(), Error> {
	let modification = Modification::new(ModifyOperation::Replace, "lockoutTime", ["0"]);
	session.modify(user, vec![modification]).await?.into_result()?;
	info!("Unlocked {user}");
	Ok(())
}

/// Set a new password without knowing the old one. Whether the directory
/// accepted it is [`Outcome::is_success`]; an `Err` means the request never
/// completed.
pub async fn modify_password(
	session: &mut dyn Session,
	user: &str,
	new_password: &str,
) -> Result<Outcome, Error> {
	let modification = Modification {
		operation: ModifyOperation::Replace,
		attribute: "unicodePwd".to_owned(),
		values: vec![encode_password(new_password)],
	};
	let outcome = session.modify(user, vec![modification]).await?;
	if outcome.is_success() {
		info!("Password of {user} reset");
	} else {
		info!("Password reset of {user} refused: {} {}", outcome.description(), outcome.text);
	}
	Ok(outcome)
}

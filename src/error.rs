//! Error codes

use ldap3::LdapError;

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A required attribute in a search result was missing.
	#[error("Missing data: {0}")]
	Missing(String),
	/// The contents of a parameter, attribute or configuration value did not
	/// conform to the expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// The directory refused the bind. Carries the directory-reported
	/// description.
	#[error("Bind failed: {0}")]
	Connection(String),
	/// One or more identifiers required by the action could not be found in
	/// the directory.
	#[error("Could not resolve identifier(s): {}", .0.join(", "))]
	Resolution(Vec<String>),
	/// The directory rejected a search, modification or extended operation.
	#[error("{description} ({code}): {text}")]
	Operation {
		/// LDAP result code.
		code: u32,
		/// Name of the result code, e.g. `insufficientAccessRights`.
		description: &'static str,
		/// Diagnostic message sent by the server.
		text: String,
	},
	/// The server could not be reached, or the connection broke or timed out
	/// mid-operation.
	#[error("Transport failure: {0}")]
	Transport(#[source] LdapError),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(LdapError),
	/// Reading certificate files failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Parameters or configuration could not be decoded.
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Whether this error stems from the socket rather than from the directory
	/// refusing something. Local file errors, such as an unreadable
	/// certificate, are not.
	#[must_use]
	pub fn is_transport(&self) -> bool {
		matches!(self, Error::Transport(_))
	}

	/// Build an [`Error::Operation`] from a result code and diagnostic text.
	pub(crate) fn operation(code: u32, text: impl Into<String>) -> Self {
		Error::Operation { code, description: describe_result_code(code), text: text.into() }
	}
}

impl From<LdapError> for Error {
	fn from(err: LdapError) -> Self {
		match err {
			LdapError::Io { .. }
			| LdapError::Timeout { .. }
			| LdapError::OpSend { .. }
			| LdapError::ResultRecv { .. }
			| LdapError::EndOfStream => Error::Transport(err),
			LdapError::LdapResult { result } => Error::operation(result.rc, result.text),
			err => Error::Ldap(err),
		}
	}
}

/// Name of an LDAP result code as defined in RFC 4511 appendix A.
#[must_use]
pub fn describe_result_code(code: u32) -> &'static str {
	match code {
		0 => "success",
		1 => "operationsError",
		2 => "protocolError",
		3 => "timeLimitExceeded",
		4 => "sizeLimitExceeded",
		7 => "authMethodNotSupported",
		8 => "strongerAuthRequired",
		10 => "referral",
		11 => "adminLimitExceeded",
		12 => "unavailableCriticalExtension",
		13 => "confidentialityRequired",
		16 => "noSuchAttribute",
		17 => "undefinedAttributeType",
		18 => "inappropriateMatching",
		19 => "constraintViolation",
		20 => "attributeOrValueExists",
		21 => "invalidAttributeSyntax",
		32 => "noSuchObject",
		34 => "invalidDNSyntax",
		48 => "inappropriateAuthentication",
		49 => "invalidCredentials",
		50 => "insufficientAccessRights",
		51 => "busy",
		52 => "unavailable",
		53 => "unwillingToPerform",
		64 => "namingViolation",
		65 => "objectClassViolation",
		66 => "notAllowedOnNonLeaf",
		67 => "notAllowedOnRDN",
		68 => "entryAlreadyExists",
		69 => "objectClassModsProhibited",
		71 => "affectsMultipleDSAs",
		_ => "other",
	}
}

//! The status, data and summary envelope returned for every action.
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Error;

/// The flat parameter mapping an action is invoked with.
pub type ActionParameters = Map<String, Value>;

/// A single data record of a result.
pub type Record = Map<String, Value>;

/// Parameter names whose values must never be echoed back.
const SECRET_PARAMETERS: &[&str] = &["password"];

/// Terminal status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
	/// The action did what was asked.
	Success,
	/// The action failed; see the message and fault.
	Error,
}

/// Accumulates what one action invocation produced.
///
/// Records and summary values are added while the handler runs; the result
/// is then finalized by value with [`ActionResult::success`] or
/// [`ActionResult::failure`], so it cannot be finalized twice.
#[derive(Debug, Serialize)]
pub struct ActionResult {
	/// The parameters the action was invoked with, secrets redacted.
	parameters: ActionParameters,
	/// Success or error. An unfinalized result reads as an error.
	status: Status,
	/// Human-readable status message.
	#[serde(skip_serializing_if = "Option::is_none")]
	message: Option<String>,
	/// The fault that caused an error status.
	#[serde(serialize_with = "serialize_fault", skip_serializing_if = "Option::is_none")]
	fault: Option<Error>,
	/// Data records.
	data: Vec<Record>,
	/// Free-form key/value summary, e.g. counts.
	summary: Map<String, Value>,
}

impl ActionResult {
	/// Start a result for an invocation with the given parameters.
	#[must_use]
	pub fn new(parameters: &ActionParameters) -> Self {
		let parameters = parameters
			.iter()
			.map(|(key, value)| {
				if SECRET_PARAMETERS.contains(&key.as_str()) {
					(key.clone(), Value::from("<redacted>"))
				} else {
					(key.clone(), value.clone())
				}
			})
			.collect();
		Self {
			parameters,
			status: Status::Error,
			message: None,
			fault: None,
			data: Vec::new(),
			summary: Map::new(),
		}
	}

	/// Append a data record. Anything but a JSON object is stored under
	/// `value`.
	pub fn add_data(&mut self, record: Value) {
		let record = match record {
			Value::Object(record) => record,
			other => Record::from_iter([("value".to_owned(), other)]),
		};
		self.data.push(record);
	}

	/// Set a summary value, replacing any previous value for the key.
	pub fn set_summary(&mut self, key: &str, value: impl Into<Value>) {
		self.summary.insert(key.to_owned(), value.into());
	}

	/// Add to a numeric summary value, starting from zero.
	pub fn add_to_summary(&mut self, key: &str, amount: usize) {
		let current = self.summary.get(key).and_then(Value::as_u64).unwrap_or_default();
		let amount = u64::try_from(amount).unwrap_or(u64::MAX);
		self.summary.insert(key.to_owned(), Value::from(current.saturating_add(amount)));
	}

	/// Finalize as successful.
	#[must_use]
	pub fn success(mut self) -> Self {
		self.status = Status::Success;
		self
	}

	/// Finalize as successful with a status message.
	#[must_use]
	pub fn success_with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self.success()
	}

	/// Finalize as failed because of `fault`. The fault's description becomes
	/// the message.
	#[must_use]
	pub fn failure(mut self, fault: Error) -> Self {
		self.status = Status::Error;
		self.message = Some(fault.to_string());
		self.fault = Some(fault);
		self
	}

	/// Finalize as failed with a specific message, keeping the fault for
	/// reference.
	#[must_use]
	pub fn failure_with_message(mut self, message: impl Into<String>, fault: Error) -> Self {
		self.status = Status::Error;
		self.message = Some(message.into());
		self.fault = Some(fault);
		self
	}

	/// The terminal status.
	#[must_use]
	pub fn status(&self) -> Status {
		self.status
	}

	/// Whether the action succeeded.
	#[must_use]
	pub fn is_success(&self) -> bool {
		self.status == Status::Success
	}

	/// The status message, if any.
	#[must_use]
	pub fn message(&self) -> Option<&str> {
		self.message.as_deref()
	}

	/// The fault behind an error status, if any.
	#[must_use]
	pub fn fault(&self) -> Option<&Error> {
		self.fault.as_ref()
	}

	/// The data records.
	#[must_use]
	pub fn data(&self) -> &[Record] {
		&self.data
	}

	/// The summary mapping.
	#[must_use]
	pub fn summary(&self) -> &Map<String, Value> {
		&self.summary
	}

	/// The echoed parameters.
	#[must_use]
	pub fn parameters(&self) -> &ActionParameters {
		&self.parameters
	}
}

/// Faults are reported by their message.
fn serialize_fault<S: Serializer>(fault: &Option<Error>, serializer: S) -> Result<S::Ok, S::Error> {
	match fault {
		Some(fault) => serializer.serialize_str(&fault.to_string()),
		None => serializer.serialize_none(),
	}
}

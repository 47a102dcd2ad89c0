//! Helper methods for extracting data from search results.
use ldap3::SearchEntry;

use crate::error::Error;

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data.
///
/// Attribute names are matched case-insensitively: the server answers with
/// the schema spelling (`sAMAccountName`) whatever casing was requested.
pub trait SearchEntryExt {
	/// All values of an attribute. Will return `None` if the attribute is
	/// absent or only present in binary form.
	fn attr_values(&self, attr: &str) -> Option<&[String]>;

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr_values(attr)?.first().map(String::as_str)
	}

	/// Get the first value of an attribute, interpreted as an unsigned
	/// integer.
	fn u32_first(&self, attr: &str) -> Option<Result<u32, Error>> {
		let value = self.attr_first(attr)?;
		// Some servers hand out flag words as signed 32-bit integers.
		Some(
			value
				.parse::<u32>()
				.or_else(|_| {
					value.parse::<i32>().map(|signed| u32::from_ne_bytes(signed.to_ne_bytes()))
				})
				.map_err(|_| Error::Invalid(format!("{attr}: {value}"))),
		)
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_values(&self, attr: &str) -> Option<&[String]> {
		if let Some(values) = self.attrs.get(attr) {
			return Some(values);
		}
		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.as_slice())
	}
}

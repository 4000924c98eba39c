//! Validated identifiers that scope credentials inside a store.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $max:expr) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Maximum accepted length in bytes.
			pub const MAX_LEN: usize = $max;

			/// Creates a new identifier after validation.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				validate($kind, &value, Self::MAX_LEN)?;

				Ok(Self(value))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier contains whitespace or control characters.
	#[error("{kind} identifier contains whitespace or control characters.")]
	InvalidCharacter {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Kind of identifier.
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

def_id! { Namespace, "Store namespace, typically one per application or client id.", "Namespace", 128 }
def_id! {
	AccountId,
	"Account within a namespace: a user label or the email of the identity a token acts as.",
	"Account",
	320
}
impl AccountId {
	/// Account label used by delegated providers that manage a single user.
	pub const DEFAULT: &'static str = "default";

	/// Returns the [`DEFAULT`](Self::DEFAULT) account.
	pub fn default_user() -> Self {
		Self(Self::DEFAULT.to_owned())
	}
}

fn validate(kind: &'static str, value: &str, max: usize) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(IdentifierError::InvalidCharacter { kind });
	}
	if value.len() > max {
		return Err(IdentifierError::TooLong { kind, max });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_control_characters() {
		assert!(Namespace::new(" sheets").is_err(), "Leading whitespace must be rejected.");
		assert!(AccountId::new("user@example.com\n").is_err());
		assert_eq!(Namespace::new(""), Err(IdentifierError::Empty { kind: "Namespace" }));

		let account =
			AccountId::new("user@example.com").expect("Account fixture should be considered valid.");

		assert_eq!(account.as_ref(), "user@example.com");
	}

	#[test]
	fn length_limits_differ_per_kind() {
		Namespace::new("n".repeat(Namespace::MAX_LEN)).expect("Exact length should succeed.");
		assert!(Namespace::new("n".repeat(Namespace::MAX_LEN + 1)).is_err());
		AccountId::new("a".repeat(200)).expect("Accounts allow long email-derived values.");
	}

	#[test]
	fn serde_enforces_validation_and_borrow_allows_lookup() {
		let ns: Namespace =
			serde_json::from_str("\"sheets-app\"").expect("Namespace should deserialize.");

		assert_eq!(ns.as_ref(), "sheets-app");
		assert!(serde_json::from_str::<Namespace>("\"with space\"").is_err());

		let map = HashMap::from([(ns, 7_u8)]);

		assert_eq!(map.get("sheets-app"), Some(&7));
	}
}

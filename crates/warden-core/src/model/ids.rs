//! Validated identifier newtypes shared across the state store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A validation error for an identifier newtype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdError {
    kind: &'static str,
    value: String,
    reason: String,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} — {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for IdError {}

fn reject_empty(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError {
            kind,
            value: s.to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if s.len() > 256 {
        return Err(IdError {
            kind,
            value: s.chars().take(32).collect(),
            reason: "must be at most 256 characters".to_owned(),
        });
    }
    if s.chars().any(char::is_whitespace) {
        return Err(IdError {
            kind,
            value: s.to_owned(),
            reason: "must not contain whitespace".to_owned(),
        });
    }
    Ok(())
}

macro_rules! id_newtype {
    ($name:ident, $kind:literal) => {
        #[doc = concat!("A validated ", $kind, " identifier.")]
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating its shape.
            ///
            /// # Errors
            /// Returns an error if the string is empty, too long, or contains whitespace.
            pub fn new(s: impl Into<String>) -> Result<Self, IdError> {
                let s = s.into();
                reject_empty($kind, &s)?;
                Ok(Self(s))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                reject_empty($kind, &s)?;
                Ok(Self(s))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(FunctionName, "FunctionName");
id_newtype!(AgentId, "AgentId");
id_newtype!(ScratchSlug, "ScratchSlug");
id_newtype!(SubdirectoryKey, "SubdirectoryKey");
id_newtype!(BranchName, "BranchName");

impl FunctionName {
    /// Extract the 8 hex-digit entry-point address conventionally encoded as
    /// the function name's final `_XXXXXXXX` suffix (e.g. `lbRefract_800225D4`).
    ///
    /// Returns `None` when the name has no such suffix.
    #[must_use]
    pub fn embedded_address(&self) -> Option<u32> {
        let s = &self.0;
        let underscore = s.rfind('_')?;
        let suffix = &s[underscore + 1..];
        if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(suffix, 16).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_name_rejects_empty() {
        assert!(FunctionName::new("").is_err());
    }

    #[test]
    fn function_name_rejects_whitespace() {
        assert!(FunctionName::new("foo bar").is_err());
    }

    #[test]
    fn function_name_display_roundtrip() {
        let n = FunctionName::new("Foo_80005940").unwrap();
        assert_eq!(format!("{n}"), "Foo_80005940");
    }

    #[test]
    fn function_name_serde_roundtrip() {
        let n = FunctionName::new("Foo_80005940").unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"Foo_80005940\"");
        let back: FunctionName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn function_name_serde_rejects_invalid() {
        assert!(serde_json::from_str::<FunctionName>("\"\"").is_err());
    }

    #[test]
    fn embedded_address_parses_suffix() {
        let n = FunctionName::new("lbRefract_800225D4").unwrap();
        assert_eq!(n.embedded_address(), Some(0x800225D4));
    }

    #[test]
    fn embedded_address_lowercase_hex() {
        let n = FunctionName::new("fn_8001e910").unwrap();
        assert_eq!(n.embedded_address(), Some(0x8001_e910));
    }

    #[test]
    fn embedded_address_none_without_suffix() {
        let n = FunctionName::new("helper_function").unwrap();
        assert_eq!(n.embedded_address(), None);
    }

    #[test]
    fn embedded_address_none_short_suffix() {
        let n = FunctionName::new("Foo_123").unwrap();
        assert_eq!(n.embedded_address(), None);
    }

    #[test]
    fn agent_id_basic() {
        let a = AgentId::new("claude-5821").unwrap();
        assert_eq!(a.as_str(), "claude-5821");
    }
}

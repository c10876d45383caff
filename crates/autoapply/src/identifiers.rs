//! Newtype domain identifiers.
//!
//! Every platform object this service touches is addressed by an opaque string
//! id. Each one gets its own newtype so a [`RunId`] can never be passed where a
//! [`WorkspaceId`] is expected, even though both are `String` under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display, and a
// Deserialize impl that rejects empty strings.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
                    .ok_or_else(|| format!("{} must not be empty", stringify!($name)))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: platform-assigned
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a run on the orchestration platform (e.g. `"run-abc123"`).
    ///
    /// Only equality is meaningful; the prefix is never parsed.
    RunId
}

string_id! {
    /// Identifies a workspace on the orchestration platform (e.g. `"ws-9x8y7z"`).
    WorkspaceId
}

string_id! {
    /// Identifies a run-trigger connection between a source workspace and the
    /// workspace whose run it queued (e.g. `"rt-3mYp4"`).
    RunTriggerId
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one inbound callback delivery.
///
/// Generated fresh for every request the listener accepts and attached to its
/// span so every log line from one callback can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(Uuid);

impl DeliveryId {
    /// Generates a new random delivery identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifier_is_rejected() {
        assert!(RunId::new("").is_none());
        assert_eq!(RunId::new("run-1").unwrap().as_str(), "run-1");
    }

    #[test]
    fn deserialize_rejects_empty_string() {
        let err = serde_json::from_str::<RunId>("\"\"").unwrap_err();
        assert!(err.to_string().contains("RunId must not be empty"));

        let id: WorkspaceId = serde_json::from_str("\"ws-1\"").unwrap();
        assert_eq!(id.to_string(), "ws-1");
    }

    #[test]
    fn delivery_ids_are_unique() {
        assert_ne!(DeliveryId::new_random(), DeliveryId::new_random());
    }
}

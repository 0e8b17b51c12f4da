//! # Domain Identity Newtypes
//!
//! Newtype wrappers for every identifier in the template and instance
//! graphs. Template identifiers and instance identifiers live in separate
//! namespaces: a `ControlTemplateId` can never be passed where a
//! `ControlId` is expected, which keeps the dedup keys of the instance
//! graph (organization + template reference) honest at compile time.
//!
//! All identifiers are opaque strings. Instance identifiers generated by
//! this crate carry a short entity prefix over a v4 UUID
//! (`ctl_4be0643f1c...`), matching the shape of identifiers created by the
//! rest of the application.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Generate a fresh identifier for a row about to be inserted.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }
        }
    };
}

// ── Organization ─────────────────────────────────────────────────────

string_id!(
    /// Identifier of the tenant that owns an instance graph.
    OrganizationId
);

// ── Template namespace ───────────────────────────────────────────────

string_id!(
    /// Identifier of a catalog framework (e.g. `soc2`).
    FrameworkId
);

string_id!(
    /// Identifier of a requirement within a catalog framework.
    RequirementId
);

string_id!(
    /// Identifier of a control template.
    ControlTemplateId
);

string_id!(
    /// Identifier of a policy template.
    PolicyTemplateId
);

string_id!(
    /// Identifier of a task template.
    TaskTemplateId
);

// ── Instance namespace ───────────────────────────────────────────────

string_id!(
    /// Identifier of an organization's framework instance.
    FrameworkInstanceId
);

string_id!(
    /// Identifier of an organization-scoped control.
    ControlId
);

string_id!(
    /// Identifier of an organization-scoped policy.
    PolicyId
);

string_id!(
    /// Identifier of an organization-scoped task.
    TaskId
);

string_id!(
    /// Identifier of a requirement-map edge row.
    RequirementMapId
);

generated_id!(FrameworkInstanceId, "frk");
generated_id!(ControlId, "ctl");
generated_id!(PolicyId, "pol");
generated_id!(TaskId, "tsk");
generated_id!(RequirementMapId, "req");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_entity_prefix() {
        assert!(ControlId::generate().as_str().starts_with("ctl_"));
        assert!(PolicyId::generate().as_str().starts_with("pol_"));
        assert!(TaskId::generate().as_str().starts_with("tsk_"));
        assert!(FrameworkInstanceId::generate().as_str().starts_with("frk_"));
        assert!(RequirementMapId::generate().as_str().starts_with("req_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ControlId::generate(), ControlId::generate());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = FrameworkId::new("soc2");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"soc2\"");
        let back: FrameworkId = serde_json::from_str("\"soc2\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_is_the_raw_identifier() {
        assert_eq!(OrganizationId::from("org_1").to_string(), "org_1");
    }
}

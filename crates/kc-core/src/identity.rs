//! # Identity Newtypes
//!
//! UUID-backed identifiers for every Kitcare aggregate. Each identifier is a
//! distinct type, so a [`SubscriptionId`] can never be passed where a
//! [`KitOrderId`] is expected. UUID identifiers are valid by construction.
//!
//! All identifiers serialize transparently as the bare UUID string, which is
//! the form stored in the `id` / `*_id` columns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_newtype!(
    /// A registered user (client or administrator).
    UserId
);

uuid_newtype!(
    /// A physical self-test kit order.
    KitOrderId
);

uuid_newtype!(
    /// A consultation request.
    ConsultationId
);

uuid_newtype!(
    /// A prepaid kit subscription.
    SubscriptionId
);

uuid_newtype!(
    /// A partner doctor who can be assigned to consultations.
    DoctorId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(KitOrderId::new(), KitOrderId::new());
    }

    #[test]
    fn display_matches_uuid() {
        let raw = Uuid::new_v4();
        let id = SubscriptionId::from_uuid(raw);
        assert_eq!(id.to_string(), raw.to_string());
        assert_eq!(id.as_uuid(), &raw);
    }

    #[test]
    fn parse_roundtrip() {
        let id = UserId::new();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<DoctorId>().is_err());
    }

    #[test]
    fn serializes_as_bare_string() {
        let raw = Uuid::nil();
        let json = serde_json::to_string(&ConsultationId::from_uuid(raw)).unwrap();
        assert_eq!(json, format!("\"{raw}\""));
    }
}

//! Identity and profile records as handed out by the identity service.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier of a member, antenna or role.
///
/// The identity service is not consistent about sending ids as numbers or
/// strings, so both are accepted and compared by their decimal/text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for MemberId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for MemberId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> de::Visitor<'de> for IdVisitor {
            type Value = MemberId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MemberId, E> {
                Ok(MemberId(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<MemberId, E> {
                Ok(MemberId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MemberId, E> {
                Ok(MemberId(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MemberId, E> {
                Ok(MemberId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Accepts `true`/`false`, `0`/`1` and `null` for boolean upstream fields.
pub(crate) fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(crate::permissions::truthy).unwrap_or(false))
}

/// The verified facts about a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: MemberId,

    /// The caller's affiliated antenna (local group)
    #[serde(default)]
    pub antenna_id: Option<MemberId>,

    #[serde(default, deserialize_with = "loose_bool")]
    pub is_superadmin: bool,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    /// Display name of the antenna. Always filled, with a placeholder when
    /// the identity service does not provide one.
    #[serde(default)]
    pub antenna_name: String,
}

impl Identity {
    pub fn new(id: impl Into<MemberId>) -> Self {
        Self {
            id: id.into(),
            antenna_id: None,
            is_superadmin: false,
            first_name: None,
            last_name: None,
            antenna_name: String::new(),
        }
    }

    pub fn with_antenna(mut self, antenna_id: impl Into<MemberId>) -> Self {
        self.antenna_id = Some(antenna_id.into());
        self
    }

    pub fn superadmin(mut self) -> Self {
        self.is_superadmin = true;
        self
    }

    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.id.to_string(),
        }
    }
}

/// A role held by a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: MemberId,

    #[serde(default)]
    pub name: Option<String>,
}

impl RoleRef {
    pub fn new(id: impl Into<MemberId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// A board position; only its presence matters for permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardPosition {
    #[serde(default)]
    pub antenna_id: Option<MemberId>,

    #[serde(default)]
    pub function: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BoardPosition {
    pub fn new(antenna_id: impl Into<MemberId>) -> Self {
        Self {
            antenna_id: Some(antenna_id.into()),
            function: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Extended role and affiliation data for an identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// The member record as returned alongside the profile
    #[serde(default)]
    pub details: serde_json::Value,

    #[serde(default)]
    pub roles: Vec<RoleRef>,

    #[serde(default)]
    pub board_positions: Vec<BoardPosition>,

    #[serde(default)]
    pub working_groups: Vec<serde_json::Value>,

    #[serde(default, deserialize_with = "loose_bool")]
    pub fees_paid: bool,
}

impl Profile {
    pub fn has_role(&self, role_id: &MemberId) -> bool {
        self.roles.iter().any(|role| &role.id == role_id)
    }

    pub fn is_board_member(&self) -> bool {
        !self.board_positions.is_empty()
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Value;

/// Lifecycle status stored in every entity's status column.
///
/// `Deleted` is terminal for the repository layer: rows are never removed,
/// only marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum StatusId {
    #[default]
    Enabled = 1,
    Disabled = 2,
    Deleted = 3,
}

impl StatusId {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<StatusId> for i32 {
    fn from(status: StatusId) -> Self {
        status.as_i32()
    }
}

impl TryFrom<i32> for StatusId {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StatusId::Enabled),
            2 => Ok(StatusId::Disabled),
            3 => Ok(StatusId::Deleted),
            other => Err(format!("invalid status id: {}", other)),
        }
    }
}

impl From<StatusId> for Value {
    fn from(status: StatusId) -> Self {
        Value::Int(status.as_i32() as i64)
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusId::Enabled => f.write_str("enabled"),
            StatusId::Disabled => f.write_str("disabled"),
            StatusId::Deleted => f.write_str("deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_integer() {
        assert_eq!(serde_json::to_string(&StatusId::Deleted).unwrap(), "3");
        let status: StatusId = serde_json::from_str("2").unwrap();
        assert_eq!(status, StatusId::Disabled);
        assert!(serde_json::from_str::<StatusId>("7").is_err());
    }

    #[test]
    fn defaults_to_enabled() {
        assert_eq!(StatusId::default(), StatusId::Enabled);
    }
}

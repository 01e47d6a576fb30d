use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Precedence level of a workflow source. Earlier variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Project,
    User,
    System,
    Provider,
}

impl Tier {
    /// All tiers in precedence order.
    pub const ALL: [Tier; 4] = [Tier::Project, Tier::User, Tier::System, Tier::Provider];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::User => "user",
            Self::System => "system",
            Self::Provider => "provider",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ReferenceParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "project" => Ok(Self::Project),
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "provider" => Ok(Self::Provider),
            _ => Err(ReferenceParseError::UnknownTier(value.to_string())),
        }
    }
}

/// A reference to a workflow by name, optionally pinned to one tier.
///
/// `deploy` resolves by precedence, `system:deploy` only looks at the system tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowRef {
    pub tier: Option<Tier>,
    pub name: String,
}

impl WorkflowRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            tier: None,
            name: name.into(),
        }
    }

    pub fn in_tier(tier: Tier, name: impl Into<String>) -> Self {
        Self {
            tier: Some(tier),
            name: name.into(),
        }
    }

    pub fn canonical(&self) -> String {
        match self.tier {
            Some(tier) => format!("{}:{}", tier, self.name),
            None => self.name.clone(),
        }
    }
}

impl Display for WorkflowRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceParseError {
    #[error("unknown workflow tier '{0}'")]
    UnknownTier(String),
    #[error("workflow name is empty")]
    EmptyName,
}

impl FromStr for WorkflowRef {
    type Err = ReferenceParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (tier, name) = match value.split_once(':') {
            Some((tier, name)) => (Some(Tier::from_str(tier.trim())?), name.trim()),
            None => (None, value),
        };

        if name.is_empty() {
            return Err(ReferenceParseError::EmptyName);
        }

        Ok(Self {
            tier,
            name: name.to_string(),
        })
    }
}

impl Serialize for WorkflowRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for WorkflowRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        WorkflowRef::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unqualified_reference() {
        let reference = WorkflowRef::from_str("deploy").expect("deploy should parse");
        assert_eq!(reference.tier, None);
        assert_eq!(reference.name, "deploy");
    }

    #[test]
    fn parses_tier_qualified_reference() {
        let reference = WorkflowRef::from_str("system:deploy").expect("system:deploy should parse");
        assert_eq!(reference.tier, Some(Tier::System));
        assert_eq!(reference.canonical(), "system:deploy");
    }

    #[test]
    fn rejects_unknown_tier() {
        let err = WorkflowRef::from_str("galaxy:deploy").expect_err("must fail");
        assert!(matches!(err, ReferenceParseError::UnknownTier(_)));
    }

    #[test]
    fn rejects_empty_name() {
        let err = WorkflowRef::from_str("user:").expect_err("must fail");
        assert_eq!(err, ReferenceParseError::EmptyName);
    }

    #[test]
    fn tiers_order_by_precedence() {
        assert!(Tier::Project < Tier::User);
        assert!(Tier::System < Tier::Provider);
    }
}

//! Recipient kinds
//!
//! A recipient names a family of addressable targets hosted on pods. An
//! entity is a singleton per id across the whole cluster; a topic may have
//! a subscriber on every pod.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecipientType {
    Entity { name: String },
    Topic { name: String },
}

impl RecipientType {
    pub fn entity(name: impl Into<String>) -> Self {
        Self::Entity { name: name.into() }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Entity { name } | Self::Topic { name } => name,
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity { name } => write!(f, "entity:{name}"),
            Self::Topic { name } => write!(f, "topic:{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_display() {
        assert_eq!(RecipientType::entity("user").to_string(), "entity:user");
        assert_eq!(RecipientType::topic("alerts").to_string(), "topic:alerts");
        assert_eq!(RecipientType::entity("user").name(), "user");
    }
}

use std::fmt;

/// Identity a command runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// A named account.
    User(String),
    /// Granted only by a valid build-scope token.
    System,
    Anonymous,
}

impl Principal {
    pub const SYSTEM_NAME: &'static str = "SYSTEM";
    pub const ANONYMOUS_NAME: &'static str = "anonymous";

    pub fn name(&self) -> &str {
        match self {
            Self::User(name) => name,
            Self::System => Self::SYSTEM_NAME,
            Self::Anonymous => Self::ANONYMOUS_NAME,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Anonymous)
    }

    /// Account name for named users.
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::User(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Assembly and configuration errors.
///
/// Every variant is fatal and is detected before any component starts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Component registered twice: {name}")]
    DuplicateComponent { name: String },

    #[error("Capability '{capability}' is provided by both '{first}' and '{second}'")]
    DuplicateProvider {
        capability: String,
        first: String,
        second: String,
    },

    #[error("Component '{component}' requires capability '{capability}' which nothing provides")]
    MissingCapability {
        component: String,
        capability: String,
    },

    #[error("Circular dependency detected between: {}", components.join(", "))]
    DependencyCycle { components: Vec<String> },

    #[error("Capability not resolved: {capability}")]
    CapabilityNotFound { capability: String },

    #[error("Capability '{capability}' was requested but not declared by '{component}'")]
    UndeclaredCapability {
        component: String,
        capability: String,
    },

    #[error("Failed to downcast capability '{capability}' to {type_name}")]
    DowncastFailed {
        capability: String,
        type_name: String,
    },

    #[error("No transport adapter registered for type '{adapter}'")]
    UnknownAdapter { adapter: String },

    #[error("Invalid configuration: {}", problems.join("; "))]
    InvalidConfig { problems: Vec<String> },

    #[error("Failed to read configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

impl Error {
    /// Convenience for a single configuration problem.
    pub fn invalid_config(problem: impl Into<String>) -> Self {
        Self::InvalidConfig {
            problems: vec![problem.into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_components() {
        let err = Error::DependencyCycle {
            components: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected between: a, b");
    }

    #[test]
    fn invalid_config_joins_problems() {
        let err = Error::InvalidConfig {
            problems: vec!["port".into(), "pool".into()],
        };
        assert_eq!(err.to_string(), "Invalid configuration: port; pool");
    }
}

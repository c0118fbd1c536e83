//! Lifecycle-specific error types

use thiserror::Error;

/// Errors that can occur while starting the runtime
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The assembly was rejected before anything started
    #[error("Invalid assembly: {0}")]
    Assembly(#[from] crate::error::Error),

    /// A component's constructor failed
    #[error("Construction failed for {component}: {message}")]
    ConstructFailed {
        /// Name of the component that failed
        component: String,
        /// Error message
        message: String,
    },

    /// A component's start hook failed
    #[error("Start hook failed for {component}: {message}")]
    StartFailed {
        /// Name of the component that failed
        component: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Timeout during {phase} of {component} after {timeout:?}")]
    Timeout {
        /// The lifecycle phase where timeout occurred
        phase: String,
        /// Name of the component
        component: String,
        /// The deadline that was exceeded
        timeout: std::time::Duration,
    },

    /// A hook panicked
    #[error("{phase} hook panicked for {component}")]
    Panicked {
        /// The lifecycle phase
        phase: String,
        /// Name of the component
        component: String,
    },
}

impl LifecycleError {
    /// Create a construction failure error
    pub fn construct_failed(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstructFailed {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a start failure error
    pub fn start_failed(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StartFailed {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(
        phase: impl Into<String>,
        component: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self::Timeout {
            phase: phase.into(),
            component: component.into(),
            timeout,
        }
    }

    /// Create a panic error
    pub fn panicked(phase: impl Into<String>, component: impl Into<String>) -> Self {
        Self::Panicked {
            phase: phase.into(),
            component: component.into(),
        }
    }

    /// Name of the component responsible, if any
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Assembly(_) => None,
            Self::ConstructFailed { component, .. }
            | Self::StartFailed { component, .. }
            | Self::Timeout { component, .. }
            | Self::Panicked { component, .. } => Some(component),
        }
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

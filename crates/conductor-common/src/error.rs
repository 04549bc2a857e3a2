//! Error types for conductor
//!
//! Every variant carries enough context (component name, operation, field)
//! to make a log line actionable without a stack trace. The retryable
//! classification only decides log severity; callers always try again on
//! the next reconcile.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for conductor operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid catalog entry, descriptor or CRD spec
    #[error("validation error for {component}: {message}")]
    Validation {
        /// Component (or catalog) with the invalid configuration
        component: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "components[2].dependencies")
        field: Option<String>,
    },

    /// A lifecycle hook failed
    #[error("component {component} failed during {operation}: {message}")]
    Component {
        /// Component whose hook failed
        component: String,
        /// Hook that failed (e.g., "pre-uninstall", "is-installed")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether another attempt is expected to succeed
        retryable: bool,
    },

    /// The status recorder could not persist a component status
    #[error("status update for {component} failed: {message}")]
    Status {
        /// Component whose status could not be written
        component: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Operator configuration error
    #[error("config error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
        /// Path of the offending config file (if any)
        path: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "driver", "probe", "cleanup")
        context: String,
    },
}

impl Error {
    /// Create a validation error without component context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            component: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a component
    pub fn validation_for(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            component: component.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a component and field path
    pub fn validation_for_field(
        component: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            component: component.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable hook failure
    pub fn component(
        component: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Component {
            component: component.into(),
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a hook failure that another attempt will not fix
    pub fn component_permanent(
        component: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Component {
            component: component.into(),
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a status recorder failure
    pub fn status(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Status {
            component: component.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            path: None,
        }
    }

    /// Create a config error pointing at a file
    pub fn config_at(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            path: Some(path.into()),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, config and serialization errors need a human to fix
    /// something. Kubernetes 4xx errors are permanent except for conflicts
    /// and throttling.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae)
                    if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::Component { retryable, .. } => *retryable,
            Error::Status { .. } => true,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the component name if this error is attributed to one
    pub fn component_name(&self) -> Option<&str> {
        match self {
            Error::Validation { component, .. }
            | Error::Component { component, .. }
            | Error::Status { component, .. } => Some(component),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Component { operation, .. } => Some(operation),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization_for_kind("yaml", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: a failing hook names the component and the operation
    ///
    /// Operators read these messages in the Platform status, so the component
    /// and the hook that failed must both appear.
    #[test]
    fn story_hook_failures_name_component_and_operation() {
        let err = Error::component("keycloak", "pre-uninstall", "secret still mounted");
        assert!(err.to_string().contains("keycloak"));
        assert!(err.to_string().contains("pre-uninstall"));
        assert_eq!(err.component_name(), Some("keycloak"));
        assert_eq!(err.context(), Some("pre-uninstall"));
        assert!(err.is_retryable());

        let err = Error::component_permanent("keycloak", "uninstall", "chart missing");
        assert!(!err.is_retryable());
    }

    /// Story: catalog mistakes are never retried
    #[test]
    fn story_configuration_mistakes_are_permanent() {
        let err = Error::validation_for_field("ingress", "dependencies", "unknown component");
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("dependencies")),
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());

        assert!(!Error::config_at("/etc/conductor/components.yaml", "empty").is_retryable());
        assert!(!Error::serialization_for_kind("Deployment", "bad yaml").is_retryable());
    }

    #[test]
    fn status_and_internal_errors_are_retryable() {
        assert!(Error::status("fluentd", "conflict").is_retryable());
        assert!(Error::internal_with_context("probe", "clock skew").is_retryable());
        assert_eq!(Error::internal("x").context(), Some(UNKNOWN_CONTEXT));
    }

    #[rstest]
    #[case::bad_request(400, false)]
    #[case::forbidden(403, false)]
    #[case::not_found(404, false)]
    #[case::conflict(409, true)]
    #[case::throttled(429, true)]
    #[case::server_error(500, true)]
    #[case::unavailable(503, true)]
    fn kube_api_errors_classified_by_status_code(#[case] code: u16, #[case] retryable: bool) {
        assert_eq!(api_error(code).is_retryable(), retryable);
    }

    #[test]
    fn yaml_errors_convert_to_serialization() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("{not: [a list").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::Serialization { kind: Some(ref k), .. } if k == "yaml"));
    }
}

//! Error types for kube-pat operations.
//!
//! Every failure the controller can observe is a variant of [`PatError`].
//! The variants are grouped by how far a failure is allowed to propagate,
//! see [`ErrorScope`].

use std::io;
use thiserror::Error;

use crate::types::{ObjectKey, Protocol};

/// Result type alias for kube-pat operations.
pub type PatResult<T> = Result<T, PatError>;

/// How far a failure propagates during a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// Confined to a single forwarding entry. The entry is skipped.
    Entry,
    /// Confined to the load-balancer synchronization of one protocol.
    Protocol,
    /// Aborts the current pass. The next trigger starts over.
    Pass,
}

/// Errors that can occur while deriving or applying the forwarding table.
#[derive(Debug, Error)]
pub enum PatError {
    /// The service referenced by a translation spec is not in the cache.
    #[error("Failed to fetch service {service} referenced by {spec}")]
    ServiceNotFound {
        /// The translation spec.
        spec: ObjectKey,
        /// The missing service.
        service: ObjectKey,
    },

    /// The referenced service is not of type ClusterIP.
    #[error("Service {service} must be of type ClusterIP to be compatible with {spec} (found {service_type})")]
    InvalidServiceType {
        /// The translation spec.
        spec: ObjectKey,
        /// The offending service.
        service: ObjectKey,
        /// The service type that was found.
        service_type: String,
    },

    /// The referenced service has no cluster address (headless).
    #[error("Service {service} referenced by {spec} has no cluster IP")]
    MissingClusterIp {
        /// The translation spec.
        spec: ObjectKey,
        /// The headless service.
        service: ObjectKey,
    },

    /// The referenced service declares no ports.
    #[error("Service {service} referenced by {spec} declares no ports")]
    NoServicePorts {
        /// The translation spec.
        spec: ObjectKey,
        /// The portless service.
        service: ObjectKey,
    },

    /// The external port declared by a spec is not a valid port number.
    #[error("Port {port} of {spec} is not a valid port number")]
    InvalidPort {
        /// The translation spec.
        spec: ObjectKey,
        /// The declared port.
        port: i32,
    },

    /// Another entry already claimed this protocol/port in the current pass.
    #[error("Port {protocol}:{port} is already taken by {claimed_by}")]
    PortConflict {
        /// Protocol of the conflicting entry.
        protocol: Protocol,
        /// External port of the conflicting entry.
        port: u16,
        /// The spec that claimed the port first.
        claimed_by: ObjectKey,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Listing a watched collection failed.
    #[error("Failed to list {collection}: {message}")]
    CacheList {
        /// The collection that could not be listed.
        collection: String,
        /// Error message.
        message: String,
    },

    /// The configured load-balancer service does not exist.
    #[error("Load balancer service {service} not found")]
    LoadBalancerNotFound {
        /// The configured service.
        service: ObjectKey,
    },

    /// Reading or writing the load-balancer service failed.
    #[error("Load balancer operation failed: {operation} {service}: {message}")]
    LoadBalancer {
        /// The operation that failed (e.g., "fetch", "update").
        operation: String,
        /// The load-balancer service.
        service: ObjectKey,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl PatError {
    /// Creates a cache listing error.
    pub fn cache_list(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CacheList {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a load-balancer transport error.
    pub fn load_balancer(
        operation: impl Into<String>,
        service: ObjectKey,
        message: impl Into<String>,
    ) -> Self {
        Self::LoadBalancer {
            operation: operation.into(),
            service,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns how far this error is allowed to propagate.
    pub fn scope(&self) -> ErrorScope {
        match self {
            PatError::ServiceNotFound { .. }
            | PatError::InvalidServiceType { .. }
            | PatError::MissingClusterIp { .. }
            | PatError::NoServicePorts { .. }
            | PatError::InvalidPort { .. }
            | PatError::PortConflict { .. } => ErrorScope::Entry,
            PatError::LoadBalancerNotFound { .. } | PatError::InvalidConfig { .. } => {
                ErrorScope::Protocol
            }
            PatError::ShellExec { .. }
            | PatError::ShellCommandFailed { .. }
            | PatError::CacheList { .. }
            | PatError::LoadBalancer { .. } => ErrorScope::Pass,
        }
    }

    /// Returns true if the failure only affects a single forwarding entry.
    pub fn is_entry_scoped(&self) -> bool {
        self.scope() == ErrorScope::Entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(s: &str) -> ObjectKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_error_display() {
        let err = PatError::ServiceNotFound {
            spec: key("default/dns"),
            service: key("default/coredns"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to fetch service default/coredns referenced by default/dns"
        );
    }

    #[test]
    fn test_port_conflict_display() {
        let err = PatError::PortConflict {
            protocol: Protocol::Tcp,
            port: 8080,
            claimed_by: key("default/web"),
        };
        assert_eq!(
            err.to_string(),
            "Port TCP:8080 is already taken by default/web"
        );
    }

    #[test]
    fn test_shell_command_failed() {
        let err = PatError::ShellCommandFailed {
            command: "/sbin/iptables -t nat -F PREROUTING".to_string(),
            exit_code: 4,
            output: "Permission denied".to_string(),
        };
        assert!(err.to_string().contains("-F PREROUTING"));
        assert!(err.to_string().contains("exit code 4"));
    }

    #[test]
    fn test_scope() {
        let spec = key("default/dns");
        assert_eq!(
            PatError::InvalidPort { spec: spec.clone(), port: 0 }.scope(),
            ErrorScope::Entry
        );
        assert!(PatError::PortConflict {
            protocol: Protocol::Udp,
            port: 53,
            claimed_by: spec.clone(),
        }
        .is_entry_scoped());
        assert_eq!(
            PatError::LoadBalancerNotFound {
                service: spec.clone(),
            }
            .scope(),
            ErrorScope::Protocol
        );
        assert_eq!(
            PatError::load_balancer("update", spec, "conflict").scope(),
            ErrorScope::Pass
        );
        assert!(!PatError::cache_list("services", "gone").is_entry_scoped());
    }
}

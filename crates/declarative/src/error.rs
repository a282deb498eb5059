//! Engine errors.
//!
//! Graph and reference errors are raised while planning, before any handler
//! performs I/O. Handler failures are wrapped in [`Error::Instance`] with the
//! address and the lifecycle phase that failed.

use crate::types::{Address, InstanceStatus};
use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle phase in which a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Normalize,
    Refresh,
    Create,
    Update,
    Delete,
    Exists,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Refresh => "refresh",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Exists => "exists",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<Address> },

    #[error("{address} references undeclared resource in '{reference}'")]
    UnknownReference { address: Address, reference: String },

    #[error("{address} references missing attribute in '{reference}'")]
    UnknownAttribute { address: Address, reference: String },

    #[error("{address} has an invalid reference '{reference}': {reason}")]
    InvalidReference {
        address: Address,
        reference: String,
        reason: String,
    },

    #[error("no handler registered for resource kind '{kind}'")]
    NoHandler { kind: String },

    #[error("{address}: {phase} failed")]
    Instance {
        address: Address,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    #[error("{address}: illegal transition {from} -> {to}")]
    InvalidTransition {
        address: Address,
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("{address} is not part of the plan")]
    NotPlanned { address: Address },

    #[error("{0}")]
    Callback(String),
}

impl Error {
    pub(crate) fn instance(address: &Address, phase: Phase, source: anyhow::Error) -> Self {
        Self::Instance {
            address: address.clone(),
            phase,
            source,
        }
    }

    /// Address of the instance the error is about, if any.
    pub fn address(&self) -> Option<&Address> {
        match self {
            Self::UnknownReference { address, .. }
            | Self::UnknownAttribute { address, .. }
            | Self::InvalidReference { address, .. }
            | Self::Instance { address, .. }
            | Self::InvalidTransition { address, .. }
            | Self::NotPlanned { address } => Some(address),
            Self::CyclicDependency { .. } | Self::NoHandler { .. } | Self::Callback(_) => None,
        }
    }

    /// Phase that failed, for handler errors.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Instance { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

fn format_cycle(cycle: &[Address]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = Error::CyclicDependency {
            cycle: vec![
                Address::new("queue", "a"),
                Address::new("queue", "b"),
                Address::new("queue", "a"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: queue.a -> queue.b -> queue.a"
        );
        assert!(err.address().is_none());
    }

    #[test]
    fn test_instance_error_keeps_source() {
        let err = Error::instance(
            &Address::new("exchange", "x"),
            Phase::Create,
            anyhow::anyhow!("broker rejected"),
        );
        assert_eq!(err.to_string(), "exchange.x: create failed");
        assert_eq!(err.phase(), Some(Phase::Create));

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("broker rejected"));
    }
}

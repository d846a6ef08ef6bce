//! Pipeline error types

use core::fmt;

use thiserror::Error;

use crate::pass::PassId;
use crate::resource::ResourceKind;

/// Completeness status of a freshly created resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    /// Size exceeds a device limit
    ExceedsLimits,
    /// The graphics API rejected the descriptor
    Invalid,
    /// Allocation failed
    OutOfMemory,
    /// Format or usage not supported by the device
    Unsupported,
}

impl TargetStatus {
    /// Stable numeric code for diagnostics
    pub fn code(self) -> u32 {
        match self {
            TargetStatus::ExceedsLimits => 0x8CD6,
            TargetStatus::Invalid => 0x8CD7,
            TargetStatus::OutOfMemory => 0x0505,
            TargetStatus::Unsupported => 0x8CDD,
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.code())
    }
}

/// Resource provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("target creation failed for {resource}, status = {status}, error = {detail}")]
    Incomplete {
        resource: ResourceKind,
        status: TargetStatus,
        detail: String,
    },
}

/// Errors raised while executing a pass
#[derive(Debug, Error)]
pub enum PassError {
    #[error("pass {pass} needs missing resource {resource}")]
    MissingResource { pass: PassId, resource: ResourceKind },

    #[error("pass {0} is not part of the active algorithm")]
    WrongAlgorithm(PassId),

    #[error("worker thread panicked during pass {0}")]
    WorkerPanicked(PassId),

    #[error("readback of {resource} failed: {detail}")]
    Readback { resource: ResourceKind, detail: String },
}

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resource provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("pass execution failed: {0}")]
    Pass(#[from] PassError),

    #[error("no resources provisioned")]
    NotProvisioned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_message_has_codes() {
        let e = ProvisionError::Incomplete {
            resource: ResourceKind::NodeBuffer,
            status: TargetStatus::ExceedsLimits,
            detail: "max_storage_buffer_binding_size".into(),
        };
        assert_eq!(
            e.to_string(),
            "target creation failed for node_buffer, status = 0x8cd6, error = max_storage_buffer_binding_size"
        );
    }
}

//! Error types for the reduction engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::strategy::Strategy;

/// Errors raised while setting up or driving a reduction.
///
/// Everything except [`ReductionError::InvalidConfig`] comes from the
/// device. None of them is retried: allocation and build errors abort task
/// initialization, dispatch and transfer errors abort the task.
#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("failed to allocate {what}: {reason}")]
    Allocation { what: &'static str, reason: String },

    #[error("failed to load kernel source {}: {source}", path.display())]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build reduction program: {0}")]
    ProgramBuild(String),

    #[error("failed to create kernel {kernel}: {reason}")]
    KernelCreation { kernel: &'static str, reason: String },

    #[error("invalid launch of {kernel}: {reason}")]
    Launch { kernel: &'static str, reason: String },

    #[error("{strategy} reduction failed at pass {pass}")]
    Dispatch {
        strategy: Strategy,
        pass: usize,
        #[source]
        source: Box<ReductionError>,
    },

    #[error("{op} failed: {reason}")]
    Transfer { op: &'static str, reason: String },
}

impl ReductionError {
    /// Wrap a device error with the strategy and pass that issued it.
    pub fn in_pass(self, strategy: Strategy, pass: usize) -> Self {
        ReductionError::Dispatch {
            strategy,
            pass,
            source: Box::new(self),
        }
    }

    /// Whether the error was raised before any device work was issued.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            ReductionError::InvalidConfig(_)
                | ReductionError::DeviceUnavailable(_)
                | ReductionError::Allocation { .. }
                | ReductionError::KernelSource { .. }
                | ReductionError::ProgramBuild(_)
                | ReductionError::KernelCreation { .. }
        )
    }
}

#[cfg(feature = "cuda")]
impl From<cudarc::driver::DriverError> for ReductionError {
    fn from(e: cudarc::driver::DriverError) -> Self {
        ReductionError::DeviceUnavailable(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReductionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_message_names_strategy_and_pass() {
        let err = ReductionError::Launch {
            kernel: "reduction_sequential_addressing",
            reason: "work group of 2048 threads exceeds device limit 1024".into(),
        }
        .in_pass(Strategy::SequentialAddressing, 3);

        let msg = err.to_string();
        assert!(msg.contains("sequential"), "{msg}");
        assert!(msg.contains("pass 3"), "{msg}");
        // The launch reason is reported once, through the source chain.
        assert!(!msg.contains("reduction_sequential_addressing"), "{msg}");
        assert!(!err.is_setup_error());

        let source = std::error::Error::source(&err).unwrap().to_string();
        assert!(source.contains("reduction_sequential_addressing"));
    }

    #[test]
    fn test_setup_errors() {
        assert!(ReductionError::ProgramBuild("syntax".into()).is_setup_error());
        assert!(ReductionError::Allocation {
            what: "ping buffer",
            reason: "out of memory".into()
        }
        .is_setup_error());
        assert!(!ReductionError::Transfer {
            op: "read-back",
            reason: "lost".into()
        }
        .is_setup_error());
    }
}

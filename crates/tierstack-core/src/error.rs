use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid CIDR block {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    /// Subnet/CIDR planning is infeasible
    #[error("allocation error in {network}: {reason}")]
    Allocation { network: String, reason: String },

    /// Not enough subnet slots of the right tier for a fleet
    #[error("placement error for {fleet}: {reason}")]
    Placement { fleet: String, reason: String },

    /// Fleet size exceeds what the placement policy can hold
    #[error("capacity error for {fleet}: {requested} instances requested, {slots} subnet slots available")]
    Capacity {
        fleet: String,
        requested: usize,
        slots: usize,
    },

    /// A step ran before the resources it depends on existed
    #[error("unresolved reference in {resource}: {missing} has not been provisioned")]
    UnresolvedReference { resource: String, missing: String },

    /// Security group trust rules broke an invariant
    #[error("policy violation in security group {group}: {reason}")]
    PolicyViolation { group: String, reason: String },

    #[error("duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    #[error("dependency cycle involving {0}")]
    DependencyCycle(String),
}

impl StackError {
    pub fn unresolved(resource: impl Into<String>, missing: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            resource: resource.into(),
            missing: missing.into(),
        }
    }

    pub fn policy(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PolicyViolation {
            group: group.into(),
            reason: reason.into(),
        }
    }

    /// Short taxonomy name used in CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Allocation { .. } => "AllocationError",
            Self::Placement { .. } => "PlacementError",
            Self::Capacity { .. } => "CapacityError",
            Self::UnresolvedReference { .. } => "UnresolvedReferenceError",
            Self::PolicyViolation { .. } => "PolicyViolationError",
            Self::DuplicateLogicalId(_) | Self::DependencyCycle(_) => "GraphError",
            Self::InvalidCidr { .. } | Self::InvalidConfig(_) => "ConfigError",
            Self::KdlParse(_) | Self::Io(_) | Self::IoError { .. } => "InputError",
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;

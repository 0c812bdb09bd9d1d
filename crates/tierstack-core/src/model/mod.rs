//! Stack model
//!
//! Parameters that drive synthesis. The synthesized resources themselves are
//! defined next to the component that produces them.

mod stack;

pub use stack::{
    CiTrustConfig, ComputeConfig, DatabaseConfig, NetworkConfig, PlacementPolicy, RemovalPolicy,
    StackConfig, TierKind, TierSpec,
};

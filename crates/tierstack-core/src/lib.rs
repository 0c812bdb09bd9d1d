//! tierstack core
//!
//! Synthesizes a secure multi-tier network topology into a resource graph.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  stack.kdl   │──▶│   StackConfig    │──▶│ Synthesizer  │
//! └──────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                  │ task graph
//!   Network ─▶ SecurityGroups ─▶ Roles ─▶ Bastion / ComputeFleet
//!                     └──────────▶ DatabaseCluster
//!                                                  │
//!           PolicyAttachment ─▶ LoadBalancer ──────▼
//!                                          ┌──────────────┐
//!                                          │ResourceGraph │
//!                                          └──────────────┘
//! ```
//!
//! Synthesis is pure: resources refer to each other through tokens that the
//! apply engine in `tierstack-cloud` resolves against the provider.

pub mod cidr;
pub mod compute;
pub mod database;
pub mod error;
pub mod graph;
pub mod identity;
pub mod loadbalancer;
pub mod loader;
pub mod model;
pub mod network;
pub mod orchestrator;
pub mod parser;
pub mod security;
pub mod token;

// Re-exports
pub use cidr::Ipv4Cidr;
pub use compute::{ComputeFleet, ComputeInstance, provision_bastion, provision_fleet};
pub use database::{DatabaseFleet, DatabaseInstance, provision_databases};
pub use error::{Result, StackError};
pub use graph::{Resource, ResourceGraph, ResourceType};
pub use identity::{Identities, PolicyStatement, Role, TrustPolicy, attach_policies, create_roles};
pub use loadbalancer::{LoadBalancer, bind_load_balancer};
pub use loader::{load_and_synthesize, load_stack};
pub use model::*;
pub use network::{Network, Subnet, build_network};
pub use orchestrator::{SynthesizedStack, Synthesizer, Task, TaskGraph, synthesize};
pub use parser::{parse_stack_file, parse_stack_string};
pub use security::{
    Exposure, IngressRule, Peer, SecurityGroup, SecurityGroups, TrustGraph, compose_security_groups,
};
pub use token::Token;

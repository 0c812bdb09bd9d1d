//! Stack parameters
//!
//! Everything synthesis needs from the outside world. Defaults reproduce the
//! reference three-tier layout: a /16 network over two AZs, two web nodes and
//! two MySQL instances.

use crate::cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level stack configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack name, shown in output and recorded in state
    pub name: String,

    /// Account the ARNs are minted in
    pub account: String,

    /// Region; AZ names are derived from it
    pub region: String,

    pub network: NetworkConfig,
    pub compute: ComputeConfig,
    pub database: DatabaseConfig,
    pub ci_trust: CiTrustConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "tierstack".to_string(),
            account: "000000000000".to_string(),
            region: "us-east-1".to_string(),
            network: NetworkConfig::default(),
            compute: ComputeConfig::default(),
            database: DatabaseConfig::default(),
            ci_trust: CiTrustConfig::default(),
        }
    }
}

/// Virtual network layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Logical id of the network
    pub name: String,

    /// Base block all subnets are carved from
    pub cidr: Ipv4Cidr,

    /// Replication factor for every tier
    pub az_count: usize,

    pub tiers: Vec<TierSpec>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "my-vpc".to_string(),
            cidr: Ipv4Cidr::from_octets(10, 0, 0, 0, 16),
            az_count: 2,
            tiers: vec![
                TierSpec::new("public", TierKind::Public, 24),
                TierSpec::new("private-subnet-egress", TierKind::PrivateEgress, 24),
                TierSpec::new("private-subnet-rds", TierKind::PrivateIsolated, 28),
            ],
        }
    }
}

impl NetworkConfig {
    pub fn tiers_of(&self, kind: TierKind) -> impl Iterator<Item = &TierSpec> {
        self.tiers.iter().filter(move |t| t.kind == kind)
    }
}

/// One subnet tier: replicated once per AZ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierSpec {
    pub name: String,
    pub kind: TierKind,
    pub mask: u8,
}

impl TierSpec {
    pub fn new(name: impl Into<String>, kind: TierKind, mask: u8) -> Self {
        Self {
            name: name.into(),
            kind,
            mask,
        }
    }
}

/// Routing/exposure category of a subnet
///
/// The derived ordering is the allocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierKind {
    /// Routed to the internet gateway
    Public,
    /// Private, outbound through a NAT gateway
    PrivateEgress,
    /// Private, no route out of the network
    PrivateIsolated,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Public => write!(f, "public"),
            TierKind::PrivateEgress => write!(f, "private-egress"),
            TierKind::PrivateIsolated => write!(f, "private-isolated"),
        }
    }
}

impl FromStr for TierKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(TierKind::Public),
            "private-egress" | "private-with-egress" => Ok(TierKind::PrivateEgress),
            "private-isolated" | "isolated" => Ok(TierKind::PrivateIsolated),
            other => Err(format!("unknown tier kind: {}", other)),
        }
    }
}

/// Compute fleet parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeConfig {
    pub fleet_size: usize,
    pub instance_type: String,
    pub bastion_instance_type: String,
    pub placement: PlacementPolicy,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            fleet_size: 2,
            instance_type: "t3.micro".to_string(),
            bastion_instance_type: "t3.nano".to_string(),
            placement: PlacementPolicy::Cycle,
        }
    }
}

/// How instances are spread over subnets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Slot `i` goes to subnet `i mod n`
    #[default]
    Cycle,
    /// At most one instance per subnet
    Strict,
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementPolicy::Cycle => write!(f, "cycle"),
            PlacementPolicy::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for PlacementPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cycle" => Ok(PlacementPolicy::Cycle),
            "strict" => Ok(PlacementPolicy::Strict),
            other => Err(format!("unknown placement policy: {}", other)),
        }
    }
}

/// Database fleet parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub fleet_size: usize,
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub allocated_storage_gib: u32,
    pub storage_type: String,
    pub admin_user: String,
    pub multi_az: bool,
    pub iam_authentication: bool,
    pub removal_policy: RemovalPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            fleet_size: 2,
            engine: "mysql".to_string(),
            engine_version: "8.0.39".to_string(),
            instance_class: "db.t3.micro".to_string(),
            allocated_storage_gib: 20,
            storage_type: "gp3".to_string(),
            admin_user: "dbadmin".to_string(),
            multi_az: true,
            iam_authentication: true,
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

/// What teardown does with a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Delete it; for databases no final snapshot is kept
    #[default]
    Destroy,
    /// Leave it in place
    Retain,
    /// Delete it after taking a final snapshot
    Snapshot,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalPolicy::Destroy => write!(f, "destroy"),
            RemovalPolicy::Retain => write!(f, "retain"),
            RemovalPolicy::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "destroy" => Ok(RemovalPolicy::Destroy),
            "retain" => Ok(RemovalPolicy::Retain),
            "snapshot" => Ok(RemovalPolicy::Snapshot),
            other => Err(format!("unknown removal policy: {}", other)),
        }
    }
}

/// Federated CI identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CiTrustConfig {
    /// OIDC issuer URL
    pub issuer: String,

    /// Client id / audience the provider must present
    pub audience: String,

    /// `sub` claim pattern the role is bound to
    pub repo_ref: String,

    /// Managed policy granted to the CI role
    pub managed_policy: String,
}

impl Default for CiTrustConfig {
    fn default() -> Self {
        Self {
            issuer: "https://token.actions.githubusercontent.com".to_string(),
            audience: "sts.amazonaws.com".to_string(),
            repo_ref: "repo:iac23/AWS-Migration:ref:refs/heads/main".to_string(),
            managed_policy: "AdministratorAccess".to_string(),
        }
    }
}

impl CiTrustConfig {
    /// Issuer host, used as the condition key prefix (`<host>:sub`)
    pub fn issuer_host(&self) -> &str {
        self.issuer
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }
}

//! Resource graph
//!
//! The single artifact synthesis produces. Nodes are resources keyed by
//! logical id; an edge `a -> b` means `b` consumes an identifier produced by
//! `a`, either through a token in its properties or an explicit dependency.

use crate::error::{Result, StackError};
use crate::model::RemovalPolicy;
use crate::token;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Kind of provider resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "AWS::EC2::VPC")]
    Vpc,
    #[serde(rename = "AWS::EC2::InternetGateway")]
    InternetGateway,
    #[serde(rename = "AWS::EC2::VPCGatewayAttachment")]
    VpcGatewayAttachment,
    #[serde(rename = "AWS::EC2::Subnet")]
    Subnet,
    #[serde(rename = "AWS::EC2::RouteTable")]
    RouteTable,
    #[serde(rename = "AWS::EC2::SubnetRouteTableAssociation")]
    SubnetRouteTableAssociation,
    #[serde(rename = "AWS::EC2::Route")]
    Route,
    #[serde(rename = "AWS::EC2::EIP")]
    Eip,
    #[serde(rename = "AWS::EC2::NatGateway")]
    NatGateway,
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup,
    #[serde(rename = "AWS::EC2::Instance")]
    Instance,
    #[serde(rename = "AWS::IAM::OIDCProvider")]
    OidcProvider,
    #[serde(rename = "AWS::IAM::Role")]
    Role,
    #[serde(rename = "AWS::IAM::InstanceProfile")]
    InstanceProfile,
    #[serde(rename = "AWS::IAM::Policy")]
    Policy,
    #[serde(rename = "AWS::SecretsManager::Secret")]
    Secret,
    #[serde(rename = "AWS::SecretsManager::SecretTargetAttachment")]
    SecretTargetAttachment,
    #[serde(rename = "AWS::RDS::DBSubnetGroup")]
    DbSubnetGroup,
    #[serde(rename = "AWS::RDS::DBInstance")]
    DbInstance,
    #[serde(rename = "AWS::ElasticLoadBalancingV2::LoadBalancer")]
    LoadBalancer,
    #[serde(rename = "AWS::ElasticLoadBalancingV2::Listener")]
    Listener,
    #[serde(rename = "AWS::ElasticLoadBalancingV2::TargetGroup")]
    TargetGroup,
}

impl ResourceType {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceType::Vpc => "AWS::EC2::VPC",
            ResourceType::InternetGateway => "AWS::EC2::InternetGateway",
            ResourceType::VpcGatewayAttachment => "AWS::EC2::VPCGatewayAttachment",
            ResourceType::Subnet => "AWS::EC2::Subnet",
            ResourceType::RouteTable => "AWS::EC2::RouteTable",
            ResourceType::SubnetRouteTableAssociation => "AWS::EC2::SubnetRouteTableAssociation",
            ResourceType::Route => "AWS::EC2::Route",
            ResourceType::Eip => "AWS::EC2::EIP",
            ResourceType::NatGateway => "AWS::EC2::NatGateway",
            ResourceType::SecurityGroup => "AWS::EC2::SecurityGroup",
            ResourceType::Instance => "AWS::EC2::Instance",
            ResourceType::OidcProvider => "AWS::IAM::OIDCProvider",
            ResourceType::Role => "AWS::IAM::Role",
            ResourceType::InstanceProfile => "AWS::IAM::InstanceProfile",
            ResourceType::Policy => "AWS::IAM::Policy",
            ResourceType::Secret => "AWS::SecretsManager::Secret",
            ResourceType::SecretTargetAttachment => "AWS::SecretsManager::SecretTargetAttachment",
            ResourceType::DbSubnetGroup => "AWS::RDS::DBSubnetGroup",
            ResourceType::DbInstance => "AWS::RDS::DBInstance",
            ResourceType::LoadBalancer => "AWS::ElasticLoadBalancingV2::LoadBalancer",
            ResourceType::Listener => "AWS::ElasticLoadBalancingV2::Listener",
            ResourceType::TargetGroup => "AWS::ElasticLoadBalancingV2::TargetGroup",
        }
    }

    /// Service segment of the ARN
    pub fn arn_service(&self) -> &'static str {
        match self {
            ResourceType::OidcProvider
            | ResourceType::Role
            | ResourceType::InstanceProfile
            | ResourceType::Policy => "iam",
            ResourceType::Secret | ResourceType::SecretTargetAttachment => "secretsmanager",
            ResourceType::DbSubnetGroup | ResourceType::DbInstance => "rds",
            ResourceType::LoadBalancer | ResourceType::Listener | ResourceType::TargetGroup => {
                "elasticloadbalancing"
            }
            _ => "ec2",
        }
    }

    /// Resource segment of the ARN, before the physical id
    pub fn arn_resource(&self) -> &'static str {
        match self {
            ResourceType::Vpc => "vpc",
            ResourceType::InternetGateway => "internet-gateway",
            ResourceType::VpcGatewayAttachment => "vpc-gateway-attachment",
            ResourceType::Subnet => "subnet",
            ResourceType::RouteTable => "route-table",
            ResourceType::SubnetRouteTableAssociation => "route-table-association",
            ResourceType::Route => "route",
            ResourceType::Eip => "elastic-ip",
            ResourceType::NatGateway => "natgateway",
            ResourceType::SecurityGroup => "security-group",
            ResourceType::Instance => "instance",
            ResourceType::OidcProvider => "oidc-provider",
            ResourceType::Role => "role",
            ResourceType::InstanceProfile => "instance-profile",
            ResourceType::Policy => "policy",
            ResourceType::Secret | ResourceType::SecretTargetAttachment => "secret",
            ResourceType::DbSubnetGroup => "subgrp",
            ResourceType::DbInstance => "db",
            ResourceType::LoadBalancer => "loadbalancer/app",
            ResourceType::Listener => "listener/app",
            ResourceType::TargetGroup => "targetgroup",
        }
    }

    /// Prefix of physical ids minted for this type
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceType::Vpc => "vpc-",
            ResourceType::InternetGateway => "igw-",
            ResourceType::VpcGatewayAttachment => "igw-attach-",
            ResourceType::Subnet => "subnet-",
            ResourceType::RouteTable => "rtb-",
            ResourceType::SubnetRouteTableAssociation => "rtbassoc-",
            ResourceType::Route => "r-",
            ResourceType::Eip => "eipalloc-",
            ResourceType::NatGateway => "nat-",
            ResourceType::SecurityGroup => "sg-",
            ResourceType::Instance => "i-",
            ResourceType::OidcProvider => "oidc-",
            ResourceType::Role => "role-",
            ResourceType::InstanceProfile => "profile-",
            ResourceType::Policy => "policy-",
            ResourceType::Secret => "secret-",
            ResourceType::SecretTargetAttachment => "secret-attach-",
            ResourceType::DbSubnetGroup => "dbsubnet-",
            ResourceType::DbInstance => "db-",
            ResourceType::LoadBalancer => "alb-",
            ResourceType::Listener => "listener-",
            ResourceType::TargetGroup => "tg-",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// One resource declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Property bag handed to the provider; may contain tokens
    pub properties: serde_json::Value,

    /// Dependencies not visible through tokens
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,

    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

impl Resource {
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: ResourceType,
        properties: serde_json::Value,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type,
            properties,
            depends_on: BTreeSet::new(),
            removal_policy: RemovalPolicy::Destroy,
        }
    }

    pub fn with_dependency(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    /// Explicit dependencies plus every id referenced through a token
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = token::referenced_ids(&self.properties);
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

/// All resources of a stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    resources: BTreeMap<String, Resource>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; logical ids must be unique
    pub fn add(&mut self, resource: Resource) -> Result<()> {
        if self.resources.contains_key(&resource.logical_id) {
            return Err(StackError::DuplicateLogicalId(resource.logical_id));
        }
        self.resources.insert(resource.logical_id.clone(), resource);
        Ok(())
    }

    pub fn extend(&mut self, resources: impl IntoIterator<Item = Resource>) -> Result<()> {
        for resource in resources {
            self.add(resource)?;
        }
        Ok(())
    }

    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn by_type(&self, resource_type: ResourceType) -> Vec<&Resource> {
        self.resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .collect()
    }

    /// Count of resources per type, for summaries
    pub fn type_counts(&self) -> BTreeMap<ResourceType, usize> {
        let mut counts = BTreeMap::new();
        for resource in self.resources.values() {
            *counts.entry(resource.resource_type).or_insert(0) += 1;
        }
        counts
    }

    /// Check that every dependency exists and that there are no cycles
    pub fn validate(&self) -> Result<()> {
        self.dependency_graph()?;
        self.apply_order()?;
        Ok(())
    }

    fn dependency_graph(&self) -> Result<DiGraphMap<&str, ()>> {
        let mut graph = DiGraphMap::new();
        for id in self.resources.keys() {
            graph.add_node(id.as_str());
        }
        for resource in self.resources.values() {
            for dep in resource.dependencies() {
                let (dep_id, _) = self.resources.get_key_value(dep.as_str()).ok_or_else(|| {
                    StackError::unresolved(resource.logical_id.clone(), dep.clone())
                })?;
                if dep_id == &resource.logical_id {
                    return Err(StackError::DependencyCycle(dep));
                }
                graph.add_edge(dep_id.as_str(), resource.logical_id.as_str(), ());
            }
        }
        Ok(graph)
    }

    /// Resources in an order where every dependency comes first
    pub fn apply_order(&self) -> Result<Vec<&Resource>> {
        let graph = self.dependency_graph()?;
        let order = toposort(&graph, None)
            .map_err(|cycle| StackError::DependencyCycle(cycle.node_id().to_string()))?;
        Ok(order
            .into_iter()
            .filter_map(|id| self.resources.get(id))
            .collect())
    }

    /// Resources grouped by depth; everything in one level can be created
    /// concurrently once the previous levels exist
    pub fn levels(&self) -> Result<Vec<Vec<&Resource>>> {
        let order = self.apply_order()?;
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<&Resource>> = Vec::new();

        for resource in order {
            let level = resource
                .dependencies()
                .iter()
                .filter_map(|dep| depth.get(dep.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(resource.logical_id.as_str(), level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(resource);
        }

        for level in &mut levels {
            level.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
        }
        Ok(levels)
    }

    /// Levels in teardown order: dependents before their dependencies
    pub fn teardown_levels(&self) -> Result<Vec<Vec<&Resource>>> {
        let mut levels = self.levels()?;
        levels.reverse();
        Ok(levels)
    }
}

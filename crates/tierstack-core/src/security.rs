//! Security policy composer
//!
//! Security groups form a directed trust graph: an ingress rule whose source
//! is another group is an edge `source -> target`. The graph is checked as a
//! whole before any resource is emitted.

use crate::cidr::Ipv4Cidr;
use crate::error::{Result, StackError};
use crate::graph::{Resource, ResourceType};
use crate::network::Network;
use crate::token;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const HTTP_PORT: u16 = 80;
pub const MYSQL_PORT: u16 = 3306;

pub const LOAD_BALANCER_GROUP: &str = "sg-alb";
pub const COMPUTE_GROUP: &str = "sg-ec2";
pub const DATABASE_GROUP: &str = "sg-rds";
pub const BASTION_GROUP: &str = "sg-bastion";

/// Traffic source of an ingress rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    Cidr(Ipv4Cidr),
    /// Another security group, by logical id
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub source: Peer,
    pub port: u16,
    pub protocol: String,
    pub description: String,
}

impl IngressRule {
    pub fn tcp(source: Peer, port: u16, description: impl Into<String>) -> Self {
        Self {
            source,
            port,
            protocol: "tcp".to_string(),
            description: description.into(),
        }
    }

    fn to_property(&self) -> Value {
        let mut rule = json!({
            "IpProtocol": self.protocol,
            "FromPort": self.port,
            "ToPort": self.port,
            "Description": self.description,
        });
        match &self.source {
            Peer::Cidr(cidr) => rule["CidrIp"] = json!(cidr.to_string()),
            Peer::Group(group) => rule["SourceSecurityGroupId"] = token::reference(group),
        }
        rule
    }
}

/// Whether a group may accept traffic from raw address ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exposure {
    Internet,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub logical_id: String,
    pub description: String,
    pub exposure: Exposure,

    /// Logical id of the network the group lives in
    pub vpc_id: String,

    /// In insertion order
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroup {
    pub fn new(logical_id: impl Into<String>, description: impl Into<String>, exposure: Exposure) -> Self {
        Self {
            logical_id: logical_id.into(),
            description: description.into(),
            exposure,
            vpc_id: String::new(),
            ingress: Vec::new(),
        }
    }

    pub fn in_vpc(mut self, vpc_id: impl Into<String>) -> Self {
        self.vpc_id = vpc_id.into();
        self
    }

    pub fn allow(mut self, rule: IngressRule) -> Self {
        self.ingress.push(rule);
        self
    }

    /// Groups this one trusts
    pub fn trusted_groups(&self) -> impl Iterator<Item = &str> {
        self.ingress.iter().filter_map(|rule| match &rule.source {
            Peer::Group(group) => Some(group.as_str()),
            Peer::Cidr(_) => None,
        })
    }

    pub fn resource(&self) -> Resource {
        let ingress: Vec<Value> = self.ingress.iter().map(IngressRule::to_property).collect();
        Resource::new(
            &self.logical_id,
            ResourceType::SecurityGroup,
            json!({
                "GroupDescription": self.description,
                "VpcId": token::reference(&self.vpc_id),
                "SecurityGroupIngress": ingress,
                "SecurityGroupEgress": [{
                    "IpProtocol": "-1",
                    "CidrIp": Ipv4Cidr::any().to_string(),
                    "Description": "Allow all outbound traffic by default",
                }],
            }),
        )
    }
}

/// Security groups keyed by logical id, with their trust edges
#[derive(Debug, Clone, Default)]
pub struct TrustGraph {
    groups: BTreeMap<String, SecurityGroup>,
}

impl TrustGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: SecurityGroup) -> Result<()> {
        if self.groups.contains_key(&group.logical_id) {
            return Err(StackError::DuplicateLogicalId(group.logical_id));
        }
        self.groups.insert(group.logical_id.clone(), group);
        Ok(())
    }

    pub fn get(&self, logical_id: &str) -> Option<&SecurityGroup> {
        self.groups.get(logical_id)
    }

    /// `(source, target)` pairs, sorted
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .groups
            .values()
            .flat_map(|target| {
                target
                    .trusted_groups()
                    .map(move |source| (source, target.logical_id.as_str()))
            })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Reject unknown sources, raw-CIDR ingress into internal groups and cycles
    pub fn validate(&self) -> Result<()> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.groups.keys() {
            graph.add_node(id.as_str());
        }

        for group in self.groups.values() {
            for rule in &group.ingress {
                match &rule.source {
                    Peer::Cidr(cidr) if group.exposure == Exposure::Internal => {
                        return Err(StackError::policy(
                            &group.logical_id,
                            format!(
                                "internal group accepts raw CIDR {} on port {}; ingress must reference a security group",
                                cidr, rule.port
                            ),
                        ));
                    }
                    Peer::Cidr(_) => {}
                    Peer::Group(source) => {
                        let (source_id, _) = self.groups.get_key_value(source).ok_or_else(|| {
                            StackError::policy(
                                &group.logical_id,
                                format!("ingress references unknown group {}", source),
                            )
                        })?;
                        if source_id == &group.logical_id {
                            return Err(StackError::policy(&group.logical_id, "group trusts itself"));
                        }
                        graph.add_edge(source_id.as_str(), group.logical_id.as_str(), ());
                    }
                }
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| StackError::policy(cycle.node_id(), "trust edges form a cycle"))
    }

    pub fn into_groups(self) -> BTreeMap<String, SecurityGroup> {
        self.groups
    }
}

/// The four groups of the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroups {
    pub load_balancer: SecurityGroup,
    pub compute: SecurityGroup,
    pub database: SecurityGroup,
    pub bastion: SecurityGroup,
}

impl SecurityGroups {
    pub fn iter(&self) -> impl Iterator<Item = &SecurityGroup> {
        [&self.load_balancer, &self.compute, &self.database, &self.bastion].into_iter()
    }

    pub fn trust_graph(&self) -> Result<TrustGraph> {
        let mut graph = TrustGraph::new();
        for group in self.iter() {
            graph.insert(group.clone())?;
        }
        Ok(graph)
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.iter().map(SecurityGroup::resource).collect()
    }
}

/// Build the internet -> load balancer -> compute -> database chain plus the
/// bastion side channel into the database tier
#[tracing::instrument(skip(network), fields(network = %network.logical_id))]
pub fn compose_security_groups(network: &Network) -> Result<SecurityGroups> {
    let load_balancer = SecurityGroup::new(
        LOAD_BALANCER_GROUP,
        "Allow web traffic from the internet",
        Exposure::Internet,
    )
    .in_vpc(&network.logical_id)
    .allow(IngressRule::tcp(
        Peer::Cidr(Ipv4Cidr::any()),
        HTTP_PORT,
        "Allow web traffic from the internet",
    ));

    let compute = SecurityGroup::new(COMPUTE_GROUP, "Only allow sg-alb traffic", Exposure::Internal)
        .in_vpc(&network.logical_id)
        .allow(IngressRule::tcp(
            Peer::Group(LOAD_BALANCER_GROUP.to_string()),
            HTTP_PORT,
            "Only allow sg-alb traffic",
        ));

    // bastion is reached through session manager only
    let bastion = SecurityGroup::new(
        BASTION_GROUP,
        "Bastion host, no inbound access",
        Exposure::Internal,
    )
    .in_vpc(&network.logical_id);

    let database = SecurityGroup::new(
        DATABASE_GROUP,
        "Only allow EC2 Instance with IAM role",
        Exposure::Internal,
    )
    .in_vpc(&network.logical_id)
    .allow(IngressRule::tcp(
        Peer::Group(COMPUTE_GROUP.to_string()),
        MYSQL_PORT,
        "Only allow EC2 Instance with IAM role",
    ))
    .allow(IngressRule::tcp(
        Peer::Group(BASTION_GROUP.to_string()),
        MYSQL_PORT,
        "Allow MySQL access from the Bastion Host",
    ));

    let groups = SecurityGroups {
        load_balancer,
        compute,
        database,
        bastion,
    };

    let trust = groups.trust_graph()?;
    trust.validate()?;
    let edges = trust.edges();
    for (source, target) in &edges {
        debug!(%source, %target, "Trust edge");
    }
    info!(groups = 4, edges = edges.len(), "Security groups composed");

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkConfig;
    use crate::network::build_network;

    fn network() -> Network {
        build_network(&NetworkConfig::default(), "us-east-1").unwrap()
    }

    #[test]
    fn test_trust_chain() {
        let groups = compose_security_groups(&network()).unwrap();
        let graph = groups.trust_graph().unwrap();
        assert_eq!(
            graph.edges(),
            vec![
                (LOAD_BALANCER_GROUP, COMPUTE_GROUP),
                (BASTION_GROUP, DATABASE_GROUP),
                (COMPUTE_GROUP, DATABASE_GROUP),
            ]
        );
    }

    #[test]
    fn test_database_sources() {
        let groups = compose_security_groups(&network()).unwrap();
        let sources: Vec<&str> = groups.database.trusted_groups().collect();
        assert_eq!(sources, vec![COMPUTE_GROUP, BASTION_GROUP]);
        assert!(groups.database.ingress.iter().all(|r| r.port == MYSQL_PORT));
    }

    #[test]
    fn test_only_internet_group_has_cidr_ingress() {
        let groups = compose_security_groups(&network()).unwrap();
        for group in groups.iter() {
            let has_cidr = group.ingress.iter().any(|r| matches!(r.source, Peer::Cidr(_)));
            assert_eq!(has_cidr, group.exposure == Exposure::Internet, "{}", group.logical_id);
        }
        assert!(groups.bastion.ingress.is_empty());
    }

    #[test]
    fn test_raw_cidr_into_private_group_rejected() {
        let mut graph = TrustGraph::new();
        graph
            .insert(
                SecurityGroup::new("db", "db", Exposure::Internal).allow(IngressRule::tcp(
                    Peer::Cidr("10.0.0.0/16".parse().unwrap()),
                    MYSQL_PORT,
                    "vpc",
                )),
            )
            .unwrap();

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, StackError::PolicyViolation { ref group, .. } if group == "db"));
    }

    #[test]
    fn test_unknown_group_rejected() {
        let mut graph = TrustGraph::new();
        graph
            .insert(
                SecurityGroup::new("web", "web", Exposure::Internal).allow(IngressRule::tcp(
                    Peer::Group("ghost".to_string()),
                    HTTP_PORT,
                    "ghost",
                )),
            )
            .unwrap();

        assert!(matches!(graph.validate(), Err(StackError::PolicyViolation { .. })));
    }

    #[test]
    fn test_trust_cycle_rejected() {
        let mut graph = TrustGraph::new();
        // sorts first but is not on the cycle
        graph
            .insert(SecurityGroup::new("a-lb", "lb", Exposure::Internet).allow(IngressRule::tcp(
                Peer::Cidr(Ipv4Cidr::any()),
                HTTP_PORT,
                "",
            )))
            .unwrap();
        graph
            .insert(SecurityGroup::new("x", "x", Exposure::Internal).allow(IngressRule::tcp(
                Peer::Group("y".to_string()),
                HTTP_PORT,
                "",
            )))
            .unwrap();
        graph
            .insert(SecurityGroup::new("y", "y", Exposure::Internal).allow(IngressRule::tcp(
                Peer::Group("x".to_string()),
                HTTP_PORT,
                "",
            )))
            .unwrap();

        match graph.validate() {
            Err(StackError::PolicyViolation { group, reason }) => {
                assert!(group == "x" || group == "y", "named {}", group);
                assert!(reason.contains("cycle"));
            }
            other => panic!("expected a policy violation, got {:?}", other),
        }
    }

    #[test]
    fn test_group_references_become_tokens() {
        let net = network();
        let groups = compose_security_groups(&net).unwrap();
        let resource = groups.database.resource();
        let rules = resource.properties["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(rules[0]["SourceSecurityGroupId"], token::reference(COMPUTE_GROUP));
        assert_eq!(rules[1]["SourceSecurityGroupId"], token::reference(BASTION_GROUP));
        assert!(resource.dependencies().contains(COMPUTE_GROUP));

        assert!(groups.iter().all(|g| g.vpc_id == net.logical_id));
        assert_eq!(resource.properties["VpcId"], token::reference(&net.logical_id));
    }
}

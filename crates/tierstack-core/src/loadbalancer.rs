//! Load balancer binder

use crate::compute::ComputeFleet;
use crate::error::{Result, StackError};
use crate::graph::{Resource, ResourceType};
use crate::model::TierKind;
use crate::network::Network;
use crate::security::{HTTP_PORT, SecurityGroup};
use crate::token;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

pub const LOAD_BALANCER_ID: &str = "app-load-balancer";
pub const LISTENER_ID: &str = "http-listener";
pub const TARGET_GROUP_ID: &str = "application-fleet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub logical_id: String,
    pub listener_id: String,
    pub target_group_id: String,
    pub network: String,
    pub subnets: Vec<String>,
    pub security_group: String,
    pub port: u16,

    /// Fixed at provisioning time
    pub targets: Vec<String>,
}

impl LoadBalancer {
    pub fn resources(&self) -> Vec<Resource> {
        let subnets: Vec<Value> = self.subnets.iter().map(|s| token::reference(s)).collect();
        let targets: Vec<Value> = self
            .targets
            .iter()
            .map(|t| json!({ "Id": token::reference(t), "Port": self.port }))
            .collect();

        vec![
            Resource::new(
                &self.logical_id,
                ResourceType::LoadBalancer,
                json!({
                    "Type": "application",
                    "Scheme": "internet-facing",
                    "Subnets": subnets,
                    "SecurityGroups": [token::reference(&self.security_group)],
                }),
            ),
            Resource::new(
                &self.target_group_id,
                ResourceType::TargetGroup,
                json!({
                    "VpcId": token::reference(&self.network),
                    "Port": self.port,
                    "Protocol": "HTTP",
                    "TargetType": "instance",
                    "Targets": targets,
                }),
            ),
            Resource::new(
                &self.listener_id,
                ResourceType::Listener,
                json!({
                    "LoadBalancerArn": token::arn(&self.logical_id),
                    "Port": self.port,
                    "Protocol": "HTTP",
                    "DefaultActions": [{
                        "Type": "forward",
                        "TargetGroupArn": token::arn(&self.target_group_id),
                    }],
                }),
            ),
        ]
    }
}

/// Front the compute fleet with an internet-facing load balancer
#[tracing::instrument(skip_all, fields(targets = fleet.len()))]
pub fn bind_load_balancer(
    network: &Network,
    security_group: &SecurityGroup,
    fleet: &ComputeFleet,
) -> Result<LoadBalancer> {
    if fleet.is_empty() {
        return Err(StackError::unresolved(TARGET_GROUP_ID, "compute instance"));
    }
    let subnets: Vec<String> = network
        .subnets_of(TierKind::Public)
        .into_iter()
        .map(|s| s.logical_id.clone())
        .collect();
    if subnets.is_empty() {
        return Err(StackError::Placement {
            fleet: LOAD_BALANCER_ID.to_string(),
            reason: "no public subnets for an internet-facing load balancer".to_string(),
        });
    }

    info!(subnets = subnets.len(), "Load balancer bound");
    Ok(LoadBalancer {
        logical_id: LOAD_BALANCER_ID.to_string(),
        listener_id: LISTENER_ID.to_string(),
        target_group_id: TARGET_GROUP_ID.to_string(),
        network: network.logical_id.clone(),
        subnets,
        security_group: security_group.logical_id.clone(),
        port: HTTP_PORT,
        targets: fleet.ids().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkConfig, PlacementPolicy};
    use crate::network::build_network;
    use crate::security::compose_security_groups;

    #[test]
    fn test_empty_fleet_is_unresolved() {
        let network = build_network(&NetworkConfig::default(), "us-east-1").unwrap();
        let groups = compose_security_groups(&network).unwrap();
        let fleet = ComputeFleet {
            placement: PlacementPolicy::Cycle,
            instances: Vec::new(),
        };

        let err = bind_load_balancer(&network, &groups.load_balancer, &fleet).unwrap_err();
        assert_eq!(err.kind(), "UnresolvedReferenceError");
    }

    #[test]
    fn test_listener_forwards_to_target_group() {
        let lb = LoadBalancer {
            logical_id: LOAD_BALANCER_ID.to_string(),
            listener_id: LISTENER_ID.to_string(),
            target_group_id: TARGET_GROUP_ID.to_string(),
            network: "my-vpc".to_string(),
            subnets: vec!["a".to_string(), "b".to_string()],
            security_group: "sg-alb".to_string(),
            port: 80,
            targets: vec!["ec2-instance-0".to_string()],
        };
        let resources = lb.resources();
        let listener = resources.iter().find(|r| r.logical_id == LISTENER_ID).unwrap();
        assert_eq!(
            listener.properties["DefaultActions"][0]["TargetGroupArn"],
            token::arn(TARGET_GROUP_ID)
        );
        let group = resources.iter().find(|r| r.logical_id == TARGET_GROUP_ID).unwrap();
        assert_eq!(
            group.properties["Targets"][0]["Id"],
            token::reference("ec2-instance-0")
        );
    }
}

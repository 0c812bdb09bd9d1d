//! Compute fleet provisioner and bastion host

use crate::error::{Result, StackError};
use crate::graph::{Resource, ResourceType};
use crate::identity::Role;
use crate::model::{ComputeConfig, PlacementPolicy, TierKind};
use crate::network::{Network, Subnet};
use crate::security::SecurityGroup;
use crate::token;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// Latest Amazon Linux 2023 image, looked up at apply time
pub const MACHINE_IMAGE_LOOKUP: &str =
    "ssm:/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64";

pub const BASTION_ID: &str = "BastionHost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInstance {
    pub logical_id: String,
    pub subnet_id: String,
    pub availability_zone: String,
    pub security_group: String,
    pub role: String,
    pub instance_profile: String,
    pub instance_type: String,
}

impl ComputeInstance {
    pub fn resource(&self) -> Resource {
        Resource::new(
            &self.logical_id,
            ResourceType::Instance,
            json!({
                "InstanceType": self.instance_type,
                "ImageId": token::lookup(MACHINE_IMAGE_LOOKUP),
                "SubnetId": token::reference(&self.subnet_id),
                "AvailabilityZone": self.availability_zone,
                "SecurityGroupIds": [token::reference(&self.security_group)],
                "IamInstanceProfile": token::reference(&self.instance_profile),
                "Tags": [{ "Key": "Name", "Value": self.logical_id }],
            }),
        )
        .with_dependency(&self.role)
    }
}

/// Immutable result of one provisioning pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeFleet {
    pub placement: PlacementPolicy,
    pub instances: Vec<ComputeInstance>,
}

impl ComputeFleet {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|i| i.logical_id.as_str())
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.instances.iter().map(ComputeInstance::resource).collect()
    }
}

/// Subnet index for each fleet slot
pub fn placement(
    fleet: &str,
    fleet_size: usize,
    subnet_count: usize,
    policy: PlacementPolicy,
) -> Result<Vec<usize>> {
    let capacity = |slots| StackError::Capacity {
        fleet: fleet.to_string(),
        requested: fleet_size,
        slots,
    };

    if subnet_count == 0 {
        return Err(capacity(0));
    }
    if policy == PlacementPolicy::Strict && fleet_size > subnet_count {
        return Err(capacity(subnet_count));
    }
    Ok((0..fleet_size).map(|slot| slot % subnet_count).collect())
}

/// Spread the fleet over the egress subnets
#[tracing::instrument(skip_all, fields(fleet_size = config.fleet_size, placement = ?config.placement))]
pub fn provision_fleet(
    config: &ComputeConfig,
    subnets: &[&Subnet],
    security_group: &SecurityGroup,
    role: &Role,
) -> Result<ComputeFleet> {
    if let Some(bad) = subnets.iter().find(|s| s.kind != TierKind::PrivateEgress) {
        return Err(StackError::Placement {
            fleet: "compute".to_string(),
            reason: format!(
                "subnet {} is {}, compute instances need egress subnets",
                bad.logical_id, bad.kind
            ),
        });
    }
    let instance_profile = role.instance_profile.clone().ok_or_else(|| {
        StackError::unresolved(role.logical_id.clone(), format!("{}-instance-profile", role.logical_id))
    })?;

    let slots = placement("compute", config.fleet_size, subnets.len(), config.placement)?;
    let instances: Vec<ComputeInstance> = slots
        .into_iter()
        .enumerate()
        .map(|(i, subnet_index)| {
            let subnet = subnets[subnet_index];
            let logical_id = format!("ec2-instance-{}", i);
            debug!(instance = %logical_id, subnet = %subnet.logical_id, "Placed instance");
            ComputeInstance {
                logical_id,
                subnet_id: subnet.logical_id.clone(),
                availability_zone: subnet.availability_zone.clone(),
                security_group: security_group.logical_id.clone(),
                role: role.logical_id.clone(),
                instance_profile: instance_profile.clone(),
                instance_type: config.instance_type.clone(),
            }
        })
        .collect();

    info!(instances = instances.len(), "Compute fleet provisioned");
    Ok(ComputeFleet {
        placement: config.placement,
        instances,
    })
}

/// Single bastion in the first public subnet
#[tracing::instrument(skip_all, fields(network = %network.logical_id))]
pub fn provision_bastion(
    config: &ComputeConfig,
    network: &Network,
    security_group: &SecurityGroup,
    role: &Role,
) -> Result<ComputeInstance> {
    let subnet = network
        .subnets_of(TierKind::Public)
        .into_iter()
        .next()
        .ok_or_else(|| StackError::Placement {
            fleet: BASTION_ID.to_string(),
            reason: "no public subnet to host the bastion".to_string(),
        })?;
    let instance_profile = role.instance_profile.clone().ok_or_else(|| {
        StackError::unresolved(BASTION_ID, format!("{}-instance-profile", role.logical_id))
    })?;

    info!(subnet = %subnet.logical_id, "Bastion host provisioned");
    Ok(ComputeInstance {
        logical_id: BASTION_ID.to_string(),
        subnet_id: subnet.logical_id.clone(),
        availability_zone: subnet.availability_zone.clone(),
        security_group: security_group.logical_id.clone(),
        role: role.logical_id.clone(),
        instance_profile,
        instance_type: config.bastion_instance_type.clone(),
    })
}

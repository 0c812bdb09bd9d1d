//! Network topology builder
//!
//! Carves the base block into one subnet per tier and AZ and emits the
//! routing fabric around them (internet gateway, NAT gateways, route tables).

use crate::cidr::Ipv4Cidr;
use crate::error::{Result, StackError};
use crate::graph::{Resource, ResourceType};
use crate::model::{NetworkConfig, TierKind, TierSpec};
use crate::token;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info};

/// Smallest and largest subnet prefixes the provider accepts
pub const MIN_SUBNET_PREFIX: u8 = 16;
pub const MAX_SUBNET_PREFIX: u8 = 28;

/// One subnet of one tier in one AZ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub logical_id: String,
    pub tier: String,
    pub kind: TierKind,
    pub az_index: usize,
    pub availability_zone: String,
    pub cidr: Ipv4Cidr,
}

/// The allocated virtual network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub logical_id: String,
    pub cidr: Ipv4Cidr,
    pub availability_zones: Vec<String>,

    /// In allocation order
    pub subnets: Vec<Subnet>,
}

impl Network {
    pub fn az_count(&self) -> usize {
        self.availability_zones.len()
    }

    /// Subnets of one kind, ordered by tier then AZ
    pub fn subnets_of(&self, kind: TierKind) -> Vec<&Subnet> {
        self.subnets.iter().filter(|s| s.kind == kind).collect()
    }

    /// Subnets of one named tier, ordered by AZ
    pub fn tier(&self, name: &str) -> Vec<&Subnet> {
        self.subnets.iter().filter(|s| s.tier == name).collect()
    }

    pub fn subnet(&self, logical_id: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.logical_id == logical_id)
    }

    pub fn internet_gateway_id(&self) -> String {
        format!("{}-igw", self.logical_id)
    }

    fn gateway_attachment_id(&self) -> String {
        format!("{}-igw-attachment", self.logical_id)
    }

    fn nat_gateway_id(&self, az_index: usize) -> String {
        format!("{}-nat-gateway-{}", self.logical_id, az_index + 1)
    }

    fn nat_eip_id(&self, az_index: usize) -> String {
        format!("{}-nat-eip-{}", self.logical_id, az_index + 1)
    }

    /// Provider resources for the network, its subnets and routing
    pub fn resources(&self) -> Vec<Resource> {
        let mut resources = vec![Resource::new(
            &self.logical_id,
            ResourceType::Vpc,
            json!({
                "CidrBlock": self.cidr.to_string(),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "Tags": [{ "Key": "Name", "Value": self.logical_id }],
            }),
        )];

        let public = self.subnets_of(TierKind::Public);
        let has_egress = self.subnets.iter().any(|s| s.kind == TierKind::PrivateEgress);

        if !public.is_empty() {
            resources.push(Resource::new(
                self.internet_gateway_id(),
                ResourceType::InternetGateway,
                json!({ "Tags": [{ "Key": "Name", "Value": self.logical_id }] }),
            ));
            resources.push(Resource::new(
                self.gateway_attachment_id(),
                ResourceType::VpcGatewayAttachment,
                json!({
                    "VpcId": token::reference(&self.logical_id),
                    "InternetGatewayId": token::reference(&self.internet_gateway_id()),
                }),
            ));
        }

        if has_egress {
            for az in 0..self.az_count() {
                // first public subnet of the AZ hosts its NAT gateway
                let Some(host) = public.iter().find(|s| s.az_index == az) else {
                    continue;
                };
                resources.push(Resource::new(
                    self.nat_eip_id(az),
                    ResourceType::Eip,
                    json!({ "Domain": "vpc" }),
                ));
                resources.push(
                    Resource::new(
                        self.nat_gateway_id(az),
                        ResourceType::NatGateway,
                        json!({
                            "SubnetId": token::reference(&host.logical_id),
                            "AllocationId": token::attribute(&self.nat_eip_id(az), "AllocationId"),
                        }),
                    )
                    .with_dependency(self.gateway_attachment_id()),
                );
            }
        }

        for subnet in &self.subnets {
            resources.extend(self.subnet_resources(subnet));
        }

        resources
    }

    fn subnet_resources(&self, subnet: &Subnet) -> Vec<Resource> {
        let route_table_id = format!("{}-route-table", subnet.logical_id);
        let mut resources = vec![
            Resource::new(
                &subnet.logical_id,
                ResourceType::Subnet,
                json!({
                    "VpcId": token::reference(&self.logical_id),
                    "CidrBlock": subnet.cidr.to_string(),
                    "AvailabilityZone": subnet.availability_zone,
                    "MapPublicIpOnLaunch": subnet.kind == TierKind::Public,
                    "Tags": [
                        { "Key": "Name", "Value": subnet.logical_id },
                        { "Key": "tierstack:subnet-name", "Value": subnet.tier },
                        { "Key": "tierstack:subnet-type", "Value": subnet.kind.to_string() },
                    ],
                }),
            ),
            Resource::new(
                &route_table_id,
                ResourceType::RouteTable,
                json!({ "VpcId": token::reference(&self.logical_id) }),
            ),
            Resource::new(
                format!("{}-route-table-association", subnet.logical_id),
                ResourceType::SubnetRouteTableAssociation,
                json!({
                    "SubnetId": token::reference(&subnet.logical_id),
                    "RouteTableId": token::reference(&route_table_id),
                }),
            ),
        ];

        let default_route = format!("{}-default-route", subnet.logical_id);
        match subnet.kind {
            TierKind::Public => resources.push(
                Resource::new(
                    default_route,
                    ResourceType::Route,
                    json!({
                        "RouteTableId": token::reference(&route_table_id),
                        "DestinationCidrBlock": Ipv4Cidr::any().to_string(),
                        "GatewayId": token::reference(&self.internet_gateway_id()),
                    }),
                )
                .with_dependency(self.gateway_attachment_id()),
            ),
            TierKind::PrivateEgress => resources.push(Resource::new(
                default_route,
                ResourceType::Route,
                json!({
                    "RouteTableId": token::reference(&route_table_id),
                    "DestinationCidrBlock": Ipv4Cidr::any().to_string(),
                    "NatGatewayId": token::reference(&self.nat_gateway_id(subnet.az_index)),
                }),
            )),
            TierKind::PrivateIsolated => {}
        }

        resources
    }
}

/// Allocate the network described by `config`
///
/// Tiers are allocated public first, then egress, then isolated; declaration
/// order is kept within a kind. Each block is aligned to its own size, so the
/// same input always yields the same CIDRs.
#[tracing::instrument(skip(config), fields(network = %config.name, cidr = %config.cidr))]
pub fn build_network(config: &NetworkConfig, region: &str) -> Result<Network> {
    let fail = |reason: String| StackError::Allocation {
        network: config.name.clone(),
        reason,
    };

    if config.az_count == 0 {
        return Err(fail("az-count must be at least 1".to_string()));
    }
    if config.az_count > 26 {
        return Err(fail(format!(
            "az-count {} exceeds the zones a region can name",
            config.az_count
        )));
    }
    if config.tiers.is_empty() {
        return Err(fail("no subnet tiers configured".to_string()));
    }

    let mut names = HashSet::new();
    for tier in &config.tiers {
        if !names.insert(tier.name.as_str()) {
            return Err(StackError::InvalidConfig(format!(
                "duplicate tier name: {}",
                tier.name
            )));
        }
    }

    let has_public = config.tiers_of(TierKind::Public).next().is_some();
    if let Some(egress) = config.tiers_of(TierKind::PrivateEgress).next() {
        if !has_public {
            return Err(fail(format!(
                "tier {} routes through NAT gateways but no public tier exists to host them",
                egress.name
            )));
        }
    }

    let availability_zones: Vec<String> = (b'a'..=b'z')
        .take(config.az_count)
        .map(|letter| format!("{}{}", region, letter as char))
        .collect();

    let mut ordered: Vec<&TierSpec> = config.tiers.iter().collect();
    ordered.sort_by_key(|t| t.kind);

    let base = config.cidr;
    let mut cursor = base.first();
    let mut subnets = Vec::with_capacity(ordered.len() * config.az_count);

    for tier in ordered {
        if tier.mask < base.prefix() || tier.mask < MIN_SUBNET_PREFIX || tier.mask > MAX_SUBNET_PREFIX
        {
            return Err(fail(format!(
                "tier {} mask /{} must be between /{} and /{} and not larger than the network",
                tier.name,
                tier.mask,
                base.prefix().max(MIN_SUBNET_PREFIX),
                MAX_SUBNET_PREFIX
            )));
        }

        let block = 1u64 << (32 - u32::from(tier.mask));
        for (az_index, zone) in availability_zones.iter().enumerate() {
            cursor = cursor.div_ceil(block) * block;
            if cursor + block > base.end() {
                return Err(fail(format!(
                    "tier {} (/{}) does not fit for {} AZs",
                    tier.name, tier.mask, config.az_count
                )));
            }
            let cidr = Ipv4Cidr::from_start(cursor, tier.mask)?;
            cursor += block;

            let logical_id = format!("{}-{}-subnet-{}", config.name, tier.name, az_index + 1);
            debug!(subnet = %logical_id, %cidr, zone = %zone, "Allocated subnet");
            subnets.push(Subnet {
                logical_id,
                tier: tier.name.clone(),
                kind: tier.kind,
                az_index,
                availability_zone: zone.clone(),
                cidr,
            });
        }
    }

    info!(subnets = subnets.len(), "Network allocated");
    Ok(Network {
        logical_id: config.name.clone(),
        cidr: base,
        availability_zones,
        subnets,
    })
}

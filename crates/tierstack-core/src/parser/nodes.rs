//! Top-level node parsers

use crate::error::{Result, StackError};
use crate::model::{
    CiTrustConfig, ComputeConfig, DatabaseConfig, NetworkConfig, StackConfig, TierKind, TierSpec,
};
use kdl::{KdlNode, KdlValue};
use std::str::FromStr;

fn invalid(node: &KdlNode, message: impl std::fmt::Display) -> StackError {
    StackError::InvalidConfig(format!("{}: {}", node.name().value(), message))
}

fn unknown_child(parent: &str, child: &KdlNode) -> StackError {
    StackError::InvalidConfig(format!(
        "unknown setting '{}' in {}",
        child.name().value(),
        parent
    ))
}

fn first_value(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

/// Named property such as `mask=24`
fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .map(|e| e.value())
}

fn string_arg(node: &KdlNode) -> Result<String> {
    first_value(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| invalid(node, "expected a string argument"))
}

fn count_arg(node: &KdlNode) -> Result<usize> {
    let value = first_value(node)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| invalid(node, "expected an integer argument"))?;
    usize::try_from(value).map_err(|_| invalid(node, format!("{} is not a valid count", value)))
}

fn bool_arg(node: &KdlNode) -> Result<bool> {
    first_value(node)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| invalid(node, "expected #true or #false"))
}

fn parsed_arg<T>(node: &KdlNode) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = string_arg(node)?;
    raw.parse::<T>().map_err(|e| invalid(node, e))
}

/// Optional leading name argument
fn node_name(node: &KdlNode) -> Option<String> {
    first_value(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes().iter())
}

/// `stack "name" { account "..." region "..." }`
pub fn parse_stack(node: &KdlNode, config: &mut StackConfig) -> Result<()> {
    if let Some(name) = node_name(node) {
        config.name = name;
    }
    for child in children(node) {
        match child.name().value() {
            "account" => config.account = string_arg(child)?,
            "region" => config.region = string_arg(child)?,
            _ => return Err(unknown_child("stack", child)),
        }
    }
    Ok(())
}

/// `network "name" { cidr ..; az-count ..; tier ... }`
///
/// Declaring any `tier` replaces the default tier list.
pub fn parse_network(node: &KdlNode) -> Result<NetworkConfig> {
    let mut network = NetworkConfig::default();
    if let Some(name) = node_name(node) {
        network.name = name;
    }

    let mut tiers = Vec::new();
    for child in children(node) {
        match child.name().value() {
            "cidr" => network.cidr = parsed_arg(child)?,
            "az-count" => network.az_count = count_arg(child)?,
            "tier" => tiers.push(parse_tier(child)?),
            _ => return Err(unknown_child("network", child)),
        }
    }
    if !tiers.is_empty() {
        network.tiers = tiers;
    }
    Ok(network)
}

fn parse_tier(node: &KdlNode) -> Result<TierSpec> {
    let name = string_arg(node)?;
    let kind = property(node, "kind")
        .and_then(|v| v.as_string())
        .ok_or_else(|| invalid(node, format!("tier {} requires kind=\"...\"", name)))?;
    let kind = TierKind::from_str(kind).map_err(|e| invalid(node, e))?;
    let mask = property(node, "mask")
        .and_then(|v| v.as_integer())
        .ok_or_else(|| invalid(node, format!("tier {} requires mask=<prefix>", name)))?;
    let mask = u8::try_from(mask)
        .map_err(|_| invalid(node, format!("tier {} mask {} is out of range", name, mask)))?;
    Ok(TierSpec::new(name, kind, mask))
}

pub fn parse_compute(node: &KdlNode) -> Result<ComputeConfig> {
    let mut compute = ComputeConfig::default();
    for child in children(node) {
        match child.name().value() {
            "fleet-size" => compute.fleet_size = count_arg(child)?,
            "instance-type" => compute.instance_type = string_arg(child)?,
            "bastion-instance-type" => compute.bastion_instance_type = string_arg(child)?,
            "placement" => compute.placement = parsed_arg(child)?,
            _ => return Err(unknown_child("compute", child)),
        }
    }
    Ok(compute)
}

pub fn parse_database(node: &KdlNode) -> Result<DatabaseConfig> {
    let mut database = DatabaseConfig::default();
    for child in children(node) {
        match child.name().value() {
            "fleet-size" => database.fleet_size = count_arg(child)?,
            "engine" => database.engine = string_arg(child)?,
            "engine-version" => database.engine_version = string_arg(child)?,
            "instance-class" => database.instance_class = string_arg(child)?,
            "allocated-storage" => {
                let gib = count_arg(child)?;
                database.allocated_storage_gib = u32::try_from(gib)
                    .map_err(|_| invalid(child, format!("{} GiB is out of range", gib)))?;
            }
            "storage-type" => database.storage_type = string_arg(child)?,
            "admin-user" => database.admin_user = string_arg(child)?,
            "multi-az" => database.multi_az = bool_arg(child)?,
            "iam-authentication" => database.iam_authentication = bool_arg(child)?,
            "removal-policy" => database.removal_policy = parsed_arg(child)?,
            _ => return Err(unknown_child("database", child)),
        }
    }
    Ok(database)
}

pub fn parse_ci_trust(node: &KdlNode) -> Result<CiTrustConfig> {
    let mut ci = CiTrustConfig::default();
    for child in children(node) {
        match child.name().value() {
            "issuer" => ci.issuer = string_arg(child)?,
            "audience" => ci.audience = string_arg(child)?,
            "repo-ref" => ci.repo_ref = string_arg(child)?,
            "managed-policy" => ci.managed_policy = string_arg(child)?,
            _ => return Err(unknown_child("ci-trust", child)),
        }
    }
    Ok(ci)
}

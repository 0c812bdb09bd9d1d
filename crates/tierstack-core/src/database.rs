//! Database cluster provisioner

use crate::error::{Result, StackError};
use crate::graph::{Resource, ResourceType};
use crate::model::{DatabaseConfig, RemovalPolicy, TierKind};
use crate::network::Subnet;
use crate::security::SecurityGroup;
use crate::token;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

pub const SUBNET_GROUP_ID: &str = "rds-subnet-group";

/// Characters the generated password must avoid
const EXCLUDED_PASSWORD_CHARS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";
const PASSWORD_LENGTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    pub logical_id: String,
    pub subnet_id: String,
    pub availability_zone: String,
    pub security_group: String,

    /// Generated credential secret
    pub secret_id: String,
    pub secret_attachment_id: String,

    pub multi_az: bool,
    pub iam_authentication: bool,
    pub removal_policy: RemovalPolicy,
}

/// Immutable result of one provisioning pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseFleet {
    pub config: DatabaseConfig,
    pub subnet_group_id: String,

    /// Every isolated subnet handed in, covered by the subnet group
    pub subnet_ids: Vec<String>,
    pub instances: Vec<DatabaseInstance>,
}

impl DatabaseFleet {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn first(&self) -> Option<&DatabaseInstance> {
        self.instances.first()
    }

    pub fn resources(&self) -> Vec<Resource> {
        if self.instances.is_empty() {
            return Vec::new();
        }

        let subnet_ids: Vec<_> = self.subnet_ids.iter().map(|id| token::reference(id)).collect();
        let mut resources = vec![Resource::new(
            &self.subnet_group_id,
            ResourceType::DbSubnetGroup,
            json!({
                "DBSubnetGroupDescription": "Subnet group for the database fleet",
                "SubnetIds": subnet_ids,
            }),
        )];

        for db in &self.instances {
            resources.push(
                Resource::new(
                    &db.secret_id,
                    ResourceType::Secret,
                    json!({
                        "Description": format!("Generated credentials for {}", db.logical_id),
                        "GenerateSecretString": {
                            "SecretStringTemplate": json!({ "username": self.config.admin_user }).to_string(),
                            "GenerateStringKey": "password",
                            "PasswordLength": PASSWORD_LENGTH,
                            "ExcludeCharacters": EXCLUDED_PASSWORD_CHARS,
                        },
                    }),
                )
                .with_removal_policy(db.removal_policy),
            );

            let mut properties = json!({
                "Engine": self.config.engine,
                "EngineVersion": self.config.engine_version,
                "DBInstanceClass": self.config.instance_class,
                "AllocatedStorage": self.config.allocated_storage_gib.to_string(),
                "StorageType": self.config.storage_type,
                "MultiAZ": db.multi_az,
                "EnableIAMDatabaseAuthentication": db.iam_authentication,
                "DBSubnetGroupName": token::reference(&self.subnet_group_id),
                "VPCSecurityGroups": [token::reference(&db.security_group)],
                "MasterUsername": self.config.admin_user,
                "MasterUserSecret": { "SecretArn": token::arn(&db.secret_id) },
                "DeletionProtection": false,
                "Tags": [
                    { "Key": "Name", "Value": db.logical_id },
                    { "Key": "tierstack:subnet", "Value": db.subnet_id },
                ],
            });
            if !db.multi_az {
                properties["AvailabilityZone"] = json!(db.availability_zone);
            }
            resources.push(
                Resource::new(&db.logical_id, ResourceType::DbInstance, properties)
                    .with_removal_policy(db.removal_policy),
            );

            resources.push(Resource::new(
                &db.secret_attachment_id,
                ResourceType::SecretTargetAttachment,
                json!({
                    "SecretId": token::reference(&db.secret_id),
                    "TargetId": token::reference(&db.logical_id),
                    "TargetType": ResourceType::DbInstance.type_name(),
                }),
            ));
        }

        resources
    }
}

/// Place `config.fleet_size` databases, instance `i` in isolated subnet `i`
#[tracing::instrument(skip_all, fields(fleet_size = config.fleet_size))]
pub fn provision_databases(
    config: &DatabaseConfig,
    subnets: &[&Subnet],
    security_group: &SecurityGroup,
) -> Result<DatabaseFleet> {
    if let Some(bad) = subnets.iter().find(|s| s.kind != TierKind::PrivateIsolated) {
        return Err(StackError::Placement {
            fleet: "database".to_string(),
            reason: format!(
                "subnet {} is {}, databases only go into isolated subnets",
                bad.logical_id, bad.kind
            ),
        });
    }
    if subnets.len() < config.fleet_size {
        return Err(StackError::Placement {
            fleet: "database".to_string(),
            reason: format!(
                "{} databases requested but only {} isolated subnets exist",
                config.fleet_size,
                subnets.len()
            ),
        });
    }

    if config.fleet_size > 0 && config.removal_policy == RemovalPolicy::Destroy {
        warn!(
            "Databases use removal policy 'destroy': teardown deletes them without a final snapshot"
        );
    }

    let instances: Vec<DatabaseInstance> = subnets
        .iter()
        .take(config.fleet_size)
        .enumerate()
        .map(|(i, subnet)| {
            let logical_id = format!("rds-instance-{}", i);
            DatabaseInstance {
                secret_id: format!("{}-secret", logical_id),
                secret_attachment_id: format!("{}-secret-attachment", logical_id),
                logical_id,
                subnet_id: subnet.logical_id.clone(),
                availability_zone: subnet.availability_zone.clone(),
                security_group: security_group.logical_id.clone(),
                multi_az: config.multi_az,
                iam_authentication: config.iam_authentication,
                removal_policy: config.removal_policy,
            }
        })
        .collect();

    info!(
        databases = instances.len(),
        engine = %config.engine,
        version = %config.engine_version,
        "Database fleet provisioned"
    );

    Ok(DatabaseFleet {
        config: config.clone(),
        subnet_group_id: SUBNET_GROUP_ID.to_string(),
        subnet_ids: subnets.iter().map(|s| s.logical_id.clone()).collect(),
        instances,
    })
}

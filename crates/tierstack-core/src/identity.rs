//! Identity binder
//!
//! Roles are created up front; their policy statements are attached in a
//! second step once the database fleet exists, because the statements name
//! the concrete secret and instance ARNs.

use crate::database::DatabaseFleet;
use crate::error::{Result, StackError};
use crate::graph::{Resource, ResourceType};
use crate::model::CiTrustConfig;
use crate::token;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const COMPUTE_SERVICE: &str = "ec2.amazonaws.com";

pub const GET_SECRET_VALUE: &str = "secretsmanager:GetSecretValue";
pub const RDS_CONNECT: &str = "rds-db:connect";

pub const OIDC_PROVIDER_ID: &str = "ci-oidc-provider";
pub const CI_ROLE_ID: &str = "ci-role";
pub const COMPUTE_ROLE_ID: &str = "ec2-role";
pub const BASTION_ROLE_ID: &str = "bastion-role";

const SSM_MANAGED_POLICY: &str = "AmazonSSMManagedInstanceCore";
const ADMIN_POLICY: &str = "AdministratorAccess";

/// ARN of an AWS managed policy
pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{}", name)
}

/// Allow `actions` on `resources`; resources may be tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<Value>) -> Self {
        Self {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    pub fn grants(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    fn to_json(&self) -> Value {
        json!({
            "Effect": "Allow",
            "Action": self.actions,
            "Resource": self.resources,
        })
    }
}

/// Who may assume a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicy {
    Service(String),
    Federated {
        /// Logical id of the OIDC provider
        provider: String,
        /// `StringLike` conditions, key -> pattern
        string_like: Vec<(String, String)>,
    },
}

impl TrustPolicy {
    fn to_json(&self) -> Value {
        let statement = match self {
            TrustPolicy::Service(service) => json!({
                "Effect": "Allow",
                "Action": "sts:AssumeRole",
                "Principal": { "Service": service },
            }),
            TrustPolicy::Federated {
                provider,
                string_like,
            } => {
                let conditions: serde_json::Map<String, Value> = string_like
                    .iter()
                    .map(|(key, pattern)| (key.clone(), json!(pattern)))
                    .collect();
                json!({
                    "Effect": "Allow",
                    "Action": "sts:AssumeRoleWithWebIdentity",
                    "Principal": { "Federated": token::reference(provider) },
                    "Condition": { "StringLike": conditions },
                })
            }
        };
        json!({ "Version": POLICY_VERSION, "Statement": [statement] })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub logical_id: String,
    pub trust: TrustPolicy,
    pub managed_policies: Vec<String>,
    pub statements: Vec<PolicyStatement>,

    /// Set for roles assumed by instances
    pub instance_profile: Option<String>,
}

impl Role {
    fn for_instances(logical_id: &str) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            trust: TrustPolicy::Service(COMPUTE_SERVICE.to_string()),
            managed_policies: Vec::new(),
            statements: Vec::new(),
            instance_profile: Some(format!("{}-instance-profile", logical_id)),
        }
    }

    pub fn policy_id(&self) -> String {
        format!("{}-default-policy", self.logical_id)
    }

    /// Resources named by statements granting `action`
    pub fn resources_for(&self, action: &str) -> Vec<&Value> {
        self.statements
            .iter()
            .filter(|s| s.grants(action))
            .flat_map(|s| s.resources.iter())
            .collect()
    }

    pub fn resources(&self) -> Vec<Resource> {
        let managed: Vec<String> = self
            .managed_policies
            .iter()
            .map(|p| managed_policy_arn(p))
            .collect();
        let mut resources = vec![Resource::new(
            &self.logical_id,
            ResourceType::Role,
            json!({
                "AssumeRolePolicyDocument": self.trust.to_json(),
                "ManagedPolicyArns": managed,
            }),
        )];

        if !self.statements.is_empty() {
            let statements: Vec<Value> = self.statements.iter().map(PolicyStatement::to_json).collect();
            resources.push(Resource::new(
                self.policy_id(),
                ResourceType::Policy,
                json!({
                    "PolicyName": self.policy_id(),
                    "PolicyDocument": { "Version": POLICY_VERSION, "Statement": statements },
                    "Roles": [token::reference(&self.logical_id)],
                }),
            ));
        }

        if let Some(profile) = &self.instance_profile {
            resources.push(Resource::new(
                profile,
                ResourceType::InstanceProfile,
                json!({ "Roles": [token::reference(&self.logical_id)] }),
            ));
        }

        resources
    }
}

/// External identity provider trusted by the CI role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcProvider {
    pub logical_id: String,
    pub url: String,
    pub client_ids: Vec<String>,
}

impl OidcProvider {
    pub fn resource(&self) -> Resource {
        Resource::new(
            &self.logical_id,
            ResourceType::OidcProvider,
            json!({
                "Url": self.url,
                "ClientIdList": self.client_ids,
            }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identities {
    pub oidc_provider: OidcProvider,
    pub ci: Role,
    pub compute: Role,
    pub bastion: Role,
}

impl Identities {
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        [&self.ci, &self.compute, &self.bastion].into_iter()
    }

    pub fn resources(&self) -> Vec<Resource> {
        let mut resources = vec![self.oidc_provider.resource()];
        for role in self.roles() {
            resources.extend(role.resources());
        }
        resources
    }
}

/// Create the CI, compute and bastion roles without any statements
#[tracing::instrument(skip_all, fields(issuer = %ci.issuer))]
pub fn create_roles(ci: &CiTrustConfig) -> Identities {
    let oidc_provider = OidcProvider {
        logical_id: OIDC_PROVIDER_ID.to_string(),
        url: ci.issuer.clone(),
        client_ids: vec![ci.audience.clone()],
    };

    if ci.managed_policy == ADMIN_POLICY {
        warn!(
            role = CI_ROLE_ID,
            repo_ref = %ci.repo_ref,
            "CI role is granted AdministratorAccess; narrow managed-policy for production stacks"
        );
    }

    let ci_role = Role {
        logical_id: CI_ROLE_ID.to_string(),
        trust: TrustPolicy::Federated {
            provider: oidc_provider.logical_id.clone(),
            string_like: vec![(format!("{}:sub", ci.issuer_host()), ci.repo_ref.clone())],
        },
        managed_policies: vec![ci.managed_policy.clone()],
        statements: Vec::new(),
        instance_profile: None,
    };

    let mut bastion = Role::for_instances(BASTION_ROLE_ID);
    bastion.managed_policies.push(SSM_MANAGED_POLICY.to_string());

    info!("Roles created");
    Identities {
        oidc_provider,
        ci: ci_role,
        compute: Role::for_instances(COMPUTE_ROLE_ID),
        bastion,
    }
}

/// Scope the compute and bastion roles to the provisioned databases
///
/// The compute role may read the first database's secret and connect to
/// every database; the bastion role may read the same secret.
#[tracing::instrument(skip_all, fields(databases = databases.len()))]
pub fn attach_policies(identities: &Identities, databases: &DatabaseFleet) -> Result<Identities> {
    let first = databases
        .first()
        .ok_or_else(|| StackError::unresolved(identities.compute.policy_id(), "database instance"))?;

    let read_secret = PolicyStatement::allow(&[GET_SECRET_VALUE], vec![token::arn(&first.secret_id)]);
    let connect = PolicyStatement::allow(
        &[RDS_CONNECT],
        databases
            .instances
            .iter()
            .map(|db| token::arn(&db.logical_id))
            .collect(),
    );

    let mut bound = identities.clone();
    bound.compute.statements = vec![read_secret.clone(), connect];
    bound.bastion.statements = vec![read_secret];

    info!("Policies attached");
    Ok(bound)
}

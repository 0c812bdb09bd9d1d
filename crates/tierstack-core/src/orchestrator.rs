//! Provisioning orchestrator
//!
//! Synthesis steps form an explicit task graph. Tasks run in topological
//! order; each produces an immutable output the orchestrator owns, and a task
//! whose inputs were never produced fails instead of guessing.

use crate::compute::{ComputeFleet, ComputeInstance, provision_bastion, provision_fleet};
use crate::database::{DatabaseFleet, provision_databases};
use crate::error::{Result, StackError};
use crate::graph::ResourceGraph;
use crate::identity::{Identities, attach_policies, create_roles};
use crate::loadbalancer::{LoadBalancer, bind_load_balancer};
use crate::model::{StackConfig, TierKind};
use crate::network::{Network, build_network};
use crate::security::{SecurityGroups, compose_security_groups};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Task {
    Network,
    SecurityGroups,
    Roles,
    Bastion,
    ComputeFleet,
    DatabaseCluster,
    PolicyAttachment,
    LoadBalancer,
}

impl Task {
    pub const ALL: [Task; 8] = [
        Task::Network,
        Task::SecurityGroups,
        Task::Roles,
        Task::Bastion,
        Task::ComputeFleet,
        Task::DatabaseCluster,
        Task::PolicyAttachment,
        Task::LoadBalancer,
    ];
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::Network => "Network",
            Task::SecurityGroups => "SecurityGroups",
            Task::Roles => "Roles",
            Task::Bastion => "Bastion",
            Task::ComputeFleet => "ComputeFleet",
            Task::DatabaseCluster => "DatabaseCluster",
            Task::PolicyAttachment => "PolicyAttachment",
            Task::LoadBalancer => "LoadBalancer",
        };
        write!(f, "{}", name)
    }
}

/// Edge `a -> b`: `b` consumes the output of `a`
pub const STANDARD_EDGES: [(Task, Task); 11] = [
    (Task::Network, Task::SecurityGroups),
    (Task::SecurityGroups, Task::Roles),
    (Task::SecurityGroups, Task::Bastion),
    (Task::Roles, Task::Bastion),
    (Task::Roles, Task::ComputeFleet),
    (Task::SecurityGroups, Task::DatabaseCluster),
    (Task::ComputeFleet, Task::PolicyAttachment),
    (Task::DatabaseCluster, Task::PolicyAttachment),
    (Task::Bastion, Task::PolicyAttachment),
    (Task::ComputeFleet, Task::LoadBalancer),
    (Task::PolicyAttachment, Task::LoadBalancer),
];

#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraphMap<Task, ()>,
}

impl TaskGraph {
    /// Every task with the standard dependencies
    pub fn standard() -> Self {
        let mut graph = DiGraphMap::new();
        for task in Task::ALL {
            graph.add_node(task);
        }
        for (from, to) in STANDARD_EDGES {
            graph.add_edge(from, to, ());
        }
        Self { graph }
    }

    /// A custom graph; tasks appear only if an edge or `tasks` names them
    pub fn from_edges(tasks: &[Task], edges: &[(Task, Task)]) -> Result<Self> {
        let mut graph = DiGraphMap::new();
        for task in tasks {
            graph.add_node(*task);
        }
        for (from, to) in edges {
            if from == to {
                return Err(StackError::DependencyCycle(from.to_string()));
            }
            graph.add_edge(*from, *to, ());
        }
        if let Err(cycle) = toposort(&graph, None) {
            return Err(StackError::DependencyCycle(cycle.node_id().to_string()));
        }
        Ok(Self { graph })
    }

    /// The standard graph with one task removed
    pub fn without(task: Task) -> Self {
        let mut graph = Self::standard();
        graph.graph.remove_node(task);
        graph
    }

    pub fn contains(&self, task: Task) -> bool {
        self.graph.contains_node(task)
    }

    pub fn dependencies(&self, task: Task) -> Vec<Task> {
        let mut deps: Vec<Task> = self
            .graph
            .neighbors_directed(task, Direction::Incoming)
            .collect();
        deps.sort();
        deps
    }

    pub fn execution_order(&self) -> Result<Vec<Task>> {
        toposort(&self.graph, None)
            .map_err(|cycle| StackError::DependencyCycle(cycle.node_id().to_string()))
    }

    /// Tasks grouped into stages; tasks in one stage are independent
    ///
    /// Each task is scheduled as late as its dependents allow, so parallel
    /// branches (compute fleet and database cluster) share the stage right
    /// before the step that joins them.
    pub fn stages(&self) -> Result<Vec<Vec<Task>>> {
        let order = self.execution_order()?;
        let mut height: HashMap<Task, usize> = HashMap::new();
        for task in order.iter().rev() {
            let h = self
                .graph
                .neighbors_directed(*task, Direction::Outgoing)
                .filter_map(|next| height.get(&next))
                .map(|h| h + 1)
                .max()
                .unwrap_or(0);
            height.insert(*task, h);
        }

        let Some(depth) = height.values().copied().max() else {
            return Ok(Vec::new());
        };
        let mut stages: Vec<Vec<Task>> = vec![Vec::new(); depth + 1];
        for task in order {
            stages[depth - height[&task]].push(task);
        }
        for stage in &mut stages {
            stage.sort();
        }
        Ok(stages)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::standard()
    }
}

/// Outputs of every task plus the materialized resource graph
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub name: String,
    pub network: Network,
    pub security_groups: SecurityGroups,
    /// Roles with their attached policies
    pub identities: Identities,
    pub bastion: ComputeInstance,
    pub compute: ComputeFleet,
    pub database: DatabaseFleet,
    pub load_balancer: LoadBalancer,
    pub stages: Vec<Vec<Task>>,
    pub graph: ResourceGraph,
}

#[derive(Default)]
struct Outputs {
    network: Option<Network>,
    security_groups: Option<SecurityGroups>,
    roles: Option<Identities>,
    bastion: Option<ComputeInstance>,
    compute: Option<ComputeFleet>,
    database: Option<DatabaseFleet>,
    identities: Option<Identities>,
    load_balancer: Option<LoadBalancer>,
}

/// Output of `producer`, failing `task` if it was never produced
fn input<T>(value: Option<T>, task: Task, producer: Task) -> Result<T> {
    value.ok_or_else(|| StackError::unresolved(task.to_string(), producer.to_string()))
}

pub struct Synthesizer<'a> {
    config: &'a StackConfig,
    tasks: TaskGraph,
}

impl<'a> Synthesizer<'a> {
    pub fn new(config: &'a StackConfig) -> Self {
        Self {
            config,
            tasks: TaskGraph::standard(),
        }
    }

    pub fn with_tasks(mut self, tasks: TaskGraph) -> Self {
        self.tasks = tasks;
        self
    }

    /// One forward pass; the first failure aborts
    #[tracing::instrument(skip(self), fields(stack = %self.config.name))]
    pub fn synthesize(&self) -> Result<SynthesizedStack> {
        let stages = self.tasks.stages()?;
        let mut out = Outputs::default();

        for task in self.tasks.execution_order()? {
            debug!(%task, "Running task");
            self.run(task, &mut out)?;
        }

        let missing = |producer: Task| StackError::unresolved(self.config.name.clone(), producer.to_string());
        let stack = SynthesizedStack {
            name: self.config.name.clone(),
            network: out.network.ok_or_else(|| missing(Task::Network))?,
            security_groups: out.security_groups.ok_or_else(|| missing(Task::SecurityGroups))?,
            identities: out.identities.ok_or_else(|| missing(Task::PolicyAttachment))?,
            bastion: out.bastion.ok_or_else(|| missing(Task::Bastion))?,
            compute: out.compute.ok_or_else(|| missing(Task::ComputeFleet))?,
            database: out.database.ok_or_else(|| missing(Task::DatabaseCluster))?,
            load_balancer: out.load_balancer.ok_or_else(|| missing(Task::LoadBalancer))?,
            stages,
            graph: ResourceGraph::new(),
        };
        let graph = materialize(&stack)?;

        info!(resources = graph.len(), "Stack synthesized");
        Ok(SynthesizedStack { graph, ..stack })
    }

    fn run(&self, task: Task, out: &mut Outputs) -> Result<()> {
        let config = self.config;
        match task {
            Task::Network => {
                out.network = Some(build_network(&config.network, &config.region)?);
            }
            Task::SecurityGroups => {
                let network = input(out.network.as_ref(), task, Task::Network)?;
                out.security_groups = Some(compose_security_groups(network)?);
            }
            Task::Roles => {
                input(out.security_groups.as_ref(), task, Task::SecurityGroups)?;
                out.roles = Some(create_roles(&config.ci_trust));
            }
            Task::Bastion => {
                let network = input(out.network.as_ref(), task, Task::Network)?;
                let groups = input(out.security_groups.as_ref(), task, Task::SecurityGroups)?;
                let roles = input(out.roles.as_ref(), task, Task::Roles)?;
                out.bastion = Some(provision_bastion(
                    &config.compute,
                    network,
                    &groups.bastion,
                    &roles.bastion,
                )?);
            }
            Task::ComputeFleet => {
                let network = input(out.network.as_ref(), task, Task::Network)?;
                let groups = input(out.security_groups.as_ref(), task, Task::SecurityGroups)?;
                let roles = input(out.roles.as_ref(), task, Task::Roles)?;
                out.compute = Some(provision_fleet(
                    &config.compute,
                    &network.subnets_of(TierKind::PrivateEgress),
                    &groups.compute,
                    &roles.compute,
                )?);
            }
            Task::DatabaseCluster => {
                let network = input(out.network.as_ref(), task, Task::Network)?;
                let groups = input(out.security_groups.as_ref(), task, Task::SecurityGroups)?;
                out.database = Some(provision_databases(
                    &config.database,
                    &network.subnets_of(TierKind::PrivateIsolated),
                    &groups.database,
                )?);
            }
            Task::PolicyAttachment => {
                let roles = input(out.roles.as_ref(), task, Task::Roles)?;
                input(out.compute.as_ref(), task, Task::ComputeFleet)?;
                input(out.bastion.as_ref(), task, Task::Bastion)?;
                let database = input(out.database.as_ref(), task, Task::DatabaseCluster)?;
                out.identities = Some(attach_policies(roles, database)?);
            }
            Task::LoadBalancer => {
                let network = input(out.network.as_ref(), task, Task::Network)?;
                let groups = input(out.security_groups.as_ref(), task, Task::SecurityGroups)?;
                let fleet = input(out.compute.as_ref(), task, Task::ComputeFleet)?;
                input(out.identities.as_ref(), task, Task::PolicyAttachment)?;
                out.load_balancer = Some(bind_load_balancer(network, &groups.load_balancer, fleet)?);
            }
        }
        Ok(())
    }
}

/// Collect every component's resources into one validated graph
fn materialize(stack: &SynthesizedStack) -> Result<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    graph.extend(stack.network.resources())?;
    graph.extend(stack.security_groups.resources())?;
    graph.extend(stack.identities.resources())?;
    graph.add(stack.bastion.resource())?;
    graph.extend(stack.compute.resources())?;
    graph.extend(stack.database.resources())?;
    graph.extend(stack.load_balancer.resources())?;
    graph.validate()?;
    Ok(graph)
}

/// Synthesize `config` with the standard task graph
pub fn synthesize(config: &StackConfig) -> Result<SynthesizedStack> {
    Synthesizer::new(config).synthesize()
}

//! Graph builder: turns a crew definition into a validated wave plan.
//!
//! A wave is a set of mutually independent agents that may run concurrently;
//! waves are ordered by dependency. Sequential mode degenerates to one agent
//! per wave, parallel mode to a single wave, and flow mode is computed from
//! the declared relations with Kahn's algorithm, grouping every node whose
//! dependencies were satisfied by the previous wave into the next one.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::crew::CrewDefinition;
use crate::errors::ValidationError;
use crate::process::ExecutionMode;

/// A topological execution plan over a crew's agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavePlan {
    /// Agent ids grouped by wave, dependency-ordered.
    pub waves: Vec<Vec<String>>,
    /// Per-agent predecessor ids, in declaration order. Used for input fan-in.
    pub predecessors: HashMap<String, Vec<String>>,
    /// Per-agent dependent ids. Used for skip propagation.
    pub dependents: HashMap<String, Vec<String>>,
}

impl WavePlan {
    /// Build and validate the wave plan for a crew definition.
    ///
    /// Duplicate agent ids, edges naming unknown agents, and cyclic flow
    /// graphs are all rejected here, so registration is the only place a
    /// malformed crew can surface.
    pub fn build(crew: &CrewDefinition) -> Result<WavePlan, ValidationError> {
        if crew.agents.is_empty() {
            return Err(ValidationError::EmptyCrew);
        }
        if crew.max_parallel_tasks == Some(0) {
            return Err(ValidationError::InvalidParallelism);
        }

        let ids: Vec<String> = crew.agents.iter().map(|a| a.agent_id.clone()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(ValidationError::DuplicateAgentId {
                    agent_id: id.clone(),
                });
            }
        }

        // Edge endpoints must exist regardless of mode; the edges themselves
        // only shape the plan in flow mode.
        let known: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        for relation in &crew.flow_relations {
            for endpoint in relation.sources.iter().chain(relation.targets.iter()) {
                if !known.contains(endpoint.as_str()) {
                    return Err(ValidationError::UnknownAgentId {
                        agent_id: endpoint.clone(),
                    });
                }
            }
        }

        match crew.execution_mode {
            ExecutionMode::Sequential => Ok(Self::build_sequential(&ids)),
            ExecutionMode::Parallel => Ok(Self::build_parallel(&ids)),
            ExecutionMode::Flow => Self::build_flow(crew, &ids),
        }
    }

    /// One agent per wave, chained in declared order.
    fn build_sequential(ids: &[String]) -> WavePlan {
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for pair in ids.windows(2) {
            predecessors.insert(pair[1].clone(), vec![pair[0].clone()]);
            dependents.insert(pair[0].clone(), vec![pair[1].clone()]);
        }
        WavePlan {
            waves: ids.iter().map(|id| vec![id.clone()]).collect(),
            predecessors,
            dependents,
        }
    }

    /// A single wave containing every agent; no dependencies.
    fn build_parallel(ids: &[String]) -> WavePlan {
        WavePlan {
            waves: vec![ids.to_vec()],
            predecessors: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Kahn's algorithm over the fan-out-expanded edge set, grouped by the
    /// wave in which each node's in-degree reaches zero. Nodes with no
    /// declared edges form their own trailing wave in declaration order.
    fn build_flow(crew: &CrewDefinition, ids: &[String]) -> Result<WavePlan, ValidationError> {
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut edges: HashSet<(String, String)> = HashSet::new();

        for relation in &crew.flow_relations {
            for source in &relation.sources {
                for target in &relation.targets {
                    // A repeated declaration of the same edge is harmless.
                    if !edges.insert((source.clone(), target.clone())) {
                        continue;
                    }
                    predecessors
                        .entry(target.clone())
                        .or_default()
                        .push(source.clone());
                    dependents
                        .entry(source.clone())
                        .or_default()
                        .push(target.clone());
                }
            }
        }

        let connected: Vec<&String> = ids
            .iter()
            .filter(|id| predecessors.contains_key(*id) || dependents.contains_key(*id))
            .collect();

        let mut in_degree: HashMap<&str, usize> = connected
            .iter()
            .map(|id| (id.as_str(), predecessors.get(*id).map_or(0, Vec::len)))
            .collect();

        let mut waves: Vec<Vec<String>> = Vec::new();
        let mut emitted: HashSet<String> = HashSet::new();

        while emitted.len() < connected.len() {
            // Declaration order within a wave keeps plans deterministic.
            let wave: Vec<String> = connected
                .iter()
                .filter(|id| !emitted.contains(id.as_str()) && in_degree[id.as_str()] == 0)
                .map(|id| (*id).clone())
                .collect();

            if wave.is_empty() {
                let unresolved: Vec<String> = connected
                    .iter()
                    .filter(|id| !emitted.contains(id.as_str()))
                    .map(|id| (*id).clone())
                    .collect();
                return Err(ValidationError::CyclicGraph { unresolved });
            }

            for member in &wave {
                emitted.insert(member.clone());
                if let Some(downstream) = dependents.get(member) {
                    for dep in downstream {
                        if let Some(degree) = in_degree.get_mut(dep.as_str()) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }
            waves.push(wave);
        }

        // Edge-free agents still run, appended as one final wave.
        let disconnected: Vec<String> = ids
            .iter()
            .filter(|id| !predecessors.contains_key(*id) && !dependents.contains_key(*id))
            .cloned()
            .collect();
        if !disconnected.is_empty() {
            waves.push(disconnected);
        }

        Ok(WavePlan {
            waves,
            predecessors,
            dependents,
        })
    }

    /// Total number of agents across all waves.
    pub fn agent_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Agent ids in dispatch order (wave by wave).
    pub fn dispatch_order(&self) -> Vec<&str> {
        self.waves
            .iter()
            .flat_map(|wave| wave.iter().map(String::as_str))
            .collect()
    }
}

//! Step dependency graph validation and ordering.

use crate::error::GraphError;
use runwarden_common::types::RunbookStep;
use std::collections::{HashMap, HashSet, VecDeque};

/// A validated step graph. Indices refer to positions in the runbook's
/// `steps` vector.
#[derive(Debug, Clone)]
pub struct StepGraph {
    /// Topological order; ties keep declaration order.
    order: Vec<usize>,
    /// Dependency indices per step.
    dependencies: Vec<Vec<usize>>,
}

impl StepGraph {
    /// Builds the graph, rejecting empty or duplicate IDs, self references,
    /// unknown dependencies and cycles.
    pub fn build(steps: &[RunbookStep]) -> Result<Self, GraphError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(GraphError::EmptyStepId);
            }
            if index.insert(step.id.as_str(), i).is_some() {
                return Err(GraphError::DuplicateStep(step.id.clone()));
            }
        }

        let mut dependencies = Vec::with_capacity(steps.len());
        for step in steps {
            let mut deps = Vec::with_capacity(step.depends_on.len());
            let mut seen = HashSet::new();
            for dep in &step.depends_on {
                if *dep == step.id {
                    return Err(GraphError::SelfReference(step.id.clone()));
                }
                let Some(&dep_index) = index.get(dep.as_str()) else {
                    return Err(GraphError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if seen.insert(dep_index) {
                    deps.push(dep_index);
                }
            }
            dependencies.push(deps);
        }

        // Kahn's algorithm.
        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }
        let mut ready: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(steps.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() < steps.len() {
            return Err(GraphError::Cycle(find_cycle(steps, &dependencies, &in_degree)));
        }

        Ok(Self {
            order,
            dependencies,
        })
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn dependencies(&self, step: usize) -> &[usize] {
        &self.dependencies[step]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Validates a step list without keeping the graph.
pub fn validate(steps: &[RunbookStep]) -> Result<(), GraphError> {
    StepGraph::build(steps).map(|_| ())
}

/// Every step left over by Kahn's algorithm has a dependency that is also
/// left over, so following those edges must revisit a step.
fn find_cycle(steps: &[RunbookStep], dependencies: &[Vec<usize>], in_degree: &[usize]) -> Vec<String> {
    let Some(start) = (0..steps.len()).find(|&i| in_degree[i] > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current].iter().find(|&&d| in_degree[d] > 0) else {
            break;
        };
        if let Some(&at) = position.get(&next) {
            let mut cycle: Vec<String> = path[at..].iter().map(|&i| steps[i].id.clone()).collect();
            cycle.push(steps[next].id.clone());
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
    path.iter().map(|&i| steps[i].id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn step(id: &str, deps: &[&str]) -> RunbookStep {
        RunbookStep {
            id: id.into(),
            name: id.into(),
            thing_id: "noop".into(),
            profile_id: String::new(),
            condition: Default::default(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            retry: None,
            timeout_secs: None,
            parameters: HashMap::new(),
        }
    }

    fn ids(steps: &[RunbookStep], graph: &StepGraph) -> Vec<String> {
        graph.order().iter().map(|&i| steps[i].id.clone()).collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let steps = vec![step("d", &["b", "c"]), step("b", &["a"]), step("c", &["a"]), step("a", &[])];
        let graph = StepGraph::build(&steps).unwrap();
        assert_eq!(ids(&steps, &graph), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn rejects_cycle_with_path() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];
        match StepGraph::build(&steps) {
            Err(GraphError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_self_references() {
        assert_eq!(
            validate(&[step("a", &["ghost"])]),
            Err(GraphError::UnknownDependency {
                step: "a".into(),
                dependency: "ghost".into()
            })
        );
        assert_eq!(
            validate(&[step("a", &["a"])]),
            Err(GraphError::SelfReference("a".into()))
        );
        assert_eq!(
            validate(&[step("a", &[]), step("a", &[])]),
            Err(GraphError::DuplicateStep("a".into()))
        );
        assert_eq!(validate(&[step(" ", &[])]), Err(GraphError::EmptyStepId));
    }

    #[test]
    fn empty_runbook_is_valid() {
        assert!(StepGraph::build(&[]).unwrap().is_empty());
    }
}

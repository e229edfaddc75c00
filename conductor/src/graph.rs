//! Static pipeline description: stages, groups, and validation.
//!
//! Groups run strictly in sequence; stages within a group may run
//! concurrently. A group's declared inputs must come from strictly
//! earlier groups, enforced when the graph is built so no run can start
//! against a malformed pipeline.

use crate::errors::GraphError;
use crate::retry::RetryPolicy;
use crate::stage::Stage;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// How a group reacts to a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the entire run as soon as any stage in the group fails.
    #[default]
    FailFast,
    /// Continue to later groups; dependents of the failure are skipped.
    BestEffort,
}

/// Static metadata and implementation for one stage.
///
/// Immutable once the pipeline is assembled.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    name: String,
    stage: Arc<dyn Stage>,
    dependencies: Vec<String>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl StageDescriptor {
    /// Creates a descriptor for a named stage.
    #[must_use]
    pub fn new(name: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            stage,
            dependencies: Vec::new(),
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Declares the stages whose outputs this stage consumes.
    #[must_use]
    pub fn with_dependencies(
        mut self,
        deps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Overrides the pipeline-wide timeout for this stage.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage implementation.
    #[must_use]
    pub fn stage(&self) -> &Arc<dyn Stage> {
        &self.stage
    }

    /// Returns the declared dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns the per-stage timeout override, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// An ordered set of stages that may execute concurrently.
#[derive(Debug, Clone)]
pub struct ExecutionGroup {
    stages: Vec<StageDescriptor>,
    policy: FailurePolicy,
}

impl ExecutionGroup {
    /// Creates a group from its stages, with the default fail-fast policy.
    #[must_use]
    pub fn new(stages: impl IntoIterator<Item = StageDescriptor>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            policy: FailurePolicy::default(),
        }
    }

    /// Sets the group's failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Returns the group's failure policy.
    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Returns the number of stages in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the group has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// A validated, ordered sequence of execution groups.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    groups: Vec<ExecutionGroup>,
}

impl DependencyGraph {
    /// Starts building a graph with the given pipeline name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> GraphBuilder {
        GraphBuilder::new(name)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the groups in execution order.
    #[must_use]
    pub fn groups_in_order(&self) -> &[ExecutionGroup] {
        &self.groups
    }

    /// Returns the total number of stages across all groups.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(ExecutionGroup::len).sum()
    }

    /// Returns every stage name, in group-then-declaration order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.stages().iter().map(StageDescriptor::name))
            .collect()
    }

    /// Returns true if the graph defines the named stage.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.groups
            .iter()
            .any(|g| g.stages().iter().any(|s| s.name() == name))
    }

    /// Returns the declared dependencies of the named stage.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .flat_map(ExecutionGroup::stages)
            .find(|s| s.name() == name)
            .map(StageDescriptor::dependencies)
    }
}

/// Builder assembling and validating a [`DependencyGraph`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    name: String,
    groups: Vec<ExecutionGroup>,
}

impl GraphBuilder {
    /// Creates a builder for a named pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// Appends an execution group after the ones already added.
    #[must_use]
    pub fn group(mut self, group: ExecutionGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Appends a group holding the given stages with the default policy.
    #[must_use]
    pub fn stages(self, stages: impl IntoIterator<Item = StageDescriptor>) -> Self {
        self.group(ExecutionGroup::new(stages))
    }

    /// Validates and finalizes the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for an empty graph or group, a duplicate
    /// stage name, or a dependency that does not resolve to a strictly
    /// earlier group.
    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        if self.groups.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut earlier: HashSet<&str> = HashSet::new();

        for (index, group) in self.groups.iter().enumerate() {
            if group.is_empty() {
                return Err(GraphError::EmptyGroup { index });
            }

            for descriptor in group.stages() {
                if !seen.insert(descriptor.name()) {
                    return Err(GraphError::DuplicateStage {
                        name: descriptor.name().to_string(),
                    });
                }
                for dep in descriptor.dependencies() {
                    if !earlier.contains(dep.as_str()) {
                        return Err(GraphError::DependencyNotEarlier {
                            stage: descriptor.name().to_string(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }

            // Names become visible to later groups only.
            for descriptor in group.stages() {
                earlier.insert(descriptor.name());
            }
        }

        Ok(DependencyGraph {
            name: self.name,
            groups: self.groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::NoOpStage;

    fn descriptor(name: &str) -> StageDescriptor {
        StageDescriptor::new(name, Arc::new(NoOpStage::new()))
    }

    #[test]
    fn builds_a_valid_diamond() {
        let graph = DependencyGraph::builder("shorts")
            .stages([descriptor("a")])
            .stages([
                descriptor("b").with_dependency("a"),
                descriptor("c").with_dependency("a"),
            ])
            .stages([descriptor("d").with_dependencies(["b", "c"])])
            .build()
            .unwrap();

        assert_eq!(graph.name(), "shorts");
        assert_eq!(graph.stage_count(), 4);
        assert_eq!(graph.groups_in_order().len(), 3);
        assert_eq!(graph.stage_names(), vec!["a", "b", "c", "d"]);
        assert!(graph.contains("c"));
        assert_eq!(
            graph.dependencies_of("d"),
            Some(&["b".to_string(), "c".to_string()][..])
        );
    }

    #[test]
    fn same_group_dependency_is_rejected() {
        let err = DependencyGraph::builder("bad")
            .stages([descriptor("a"), descriptor("b").with_dependency("a")])
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::DependencyNotEarlier {
                stage: "b".to_string(),
                dependency: "a".to_string(),
            }
        );
    }

    #[test]
    fn later_group_dependency_is_rejected() {
        let err = DependencyGraph::builder("bad")
            .stages([descriptor("a").with_dependency("z")])
            .stages([descriptor("z")])
            .build()
            .unwrap_err();

        assert!(matches!(err, GraphError::DependencyNotEarlier { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = DependencyGraph::builder("bad")
            .stages([descriptor("a")])
            .stages([descriptor("a")])
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::DuplicateStage {
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn empty_graph_and_group_are_rejected() {
        assert_eq!(
            DependencyGraph::builder("bad").build().unwrap_err(),
            GraphError::EmptyGraph
        );

        let err = DependencyGraph::builder("bad")
            .group(ExecutionGroup::new([]))
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::EmptyGroup { index: 0 });
    }

    #[test]
    fn group_policy_defaults_to_fail_fast() {
        let group = ExecutionGroup::new([descriptor("a")]);
        assert_eq!(group.policy(), FailurePolicy::FailFast);

        let group = group.with_policy(FailurePolicy::BestEffort);
        assert_eq!(group.policy(), FailurePolicy::BestEffort);
    }
}

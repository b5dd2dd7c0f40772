//! Workflow compilation: validation and channel collection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};

use super::channel::ChannelSpec;
use super::{DagNode, Step};

/// Why a step tree failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphViolation {
    /// The orchestration has no steps.
    EmptyOrchestration,
    /// Two nodes in the same scope share a name.
    DuplicateNode(String),
    /// A DAG node depends on a name that is not present.
    UnknownDependency {
        /// The depending node.
        node: String,
        /// The missing dependency.
        depends_on: String,
    },
    /// The DAG contains a cycle among these nodes.
    CycleDetected(BTreeSet<String>),
}

impl std::fmt::Display for GraphViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyOrchestration => write!(f, "empty orchestration"),
            Self::DuplicateNode(name) => write!(f, "duplicate node '{name}'"),
            Self::UnknownDependency { node, depends_on } => {
                write!(f, "node '{node}' depends on unknown node '{depends_on}'")
            }
            Self::CycleDetected(nodes) => {
                let names: Vec<&str> = nodes.iter().map(String::as_str).collect();
                write!(f, "cycle detected among {{{}}}", names.join(", "))
            }
        }
    }
}

/// A validated step tree plus its channel declarations.
///
/// The workflow owns its step instances; agents appearing in several
/// workflows are shared references, never duplicated.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub(crate) id: String,
    pub(crate) root: Step,
    pub(crate) channels: BTreeMap<String, ChannelSpec>,
}

impl Workflow {
    /// Validate `root` and build a workflow identified by `id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidGraph`] for an empty orchestration, duplicate
    /// node names within a scope, unknown DAG dependencies, or cycles.
    pub fn new(id: impl Into<String>, root: Step) -> Result<Self> {
        validate(&root)?;
        let mut channels = BTreeMap::new();
        collect_channels(&root, "", &mut channels);
        Ok(Self {
            id: id.into(),
            root,
            channels,
        })
    }

    /// The workflow's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declare an extra channel (for external writes).
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when the name is already declared.
    pub fn with_channel(mut self, spec: ChannelSpec) -> Result<Self> {
        if self.channels.contains_key(&spec.name) {
            return Err(Error::configuration(format!(
                "channel '{}' is already declared",
                spec.name
            )));
        }
        self.channels.insert(spec.name.clone(), spec);
        Ok(self)
    }

    /// All declared channels, sorted by name.
    #[must_use]
    pub const fn channels(&self) -> &BTreeMap<String, ChannelSpec> {
        &self.channels
    }
}

fn validate(step: &Step) -> Result<()> {
    match step {
        Step::Sequential { steps, .. } => {
            if steps.is_empty() {
                return Err(Error::InvalidGraph(GraphViolation::EmptyOrchestration));
            }
            check_sibling_names(steps.iter().map(Step::name))?;
            for child in steps {
                validate(child)?;
            }
            Ok(())
        }
        Step::Parallel { steps, .. } => {
            if steps.is_empty() {
                return Err(Error::InvalidGraph(GraphViolation::EmptyOrchestration));
            }
            check_sibling_names(steps.iter().map(Step::name))?;
            for child in steps {
                validate(child)?;
            }
            Ok(())
        }
        Step::Dag { nodes, .. } => validate_dag(nodes),
        Step::Branch {
            then_step,
            else_step,
            ..
        } => {
            validate(then_step)?;
            if let Some(else_step) = else_step {
                validate(else_step)?;
            }
            Ok(())
        }
        Step::RepeatWhile { body, .. } => validate(body),
        Step::Router { routes, .. } => {
            if routes.is_empty() {
                return Err(Error::InvalidGraph(GraphViolation::EmptyOrchestration));
            }
            Ok(())
        }
        Step::Transform { .. }
        | Step::Guard { .. }
        | Step::HumanApproval { .. }
        | Step::Interrupt { .. }
        | Step::AgentRun { .. } => Ok(()),
    }
}

fn check_sibling_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::InvalidGraph(GraphViolation::DuplicateNode(
                name.to_owned(),
            )));
        }
    }
    Ok(())
}

fn validate_dag(nodes: &[DagNode]) -> Result<()> {
    if nodes.is_empty() {
        return Err(Error::InvalidGraph(GraphViolation::EmptyOrchestration));
    }
    check_sibling_names(nodes.iter().map(|n| n.name.as_str()))?;

    let known: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    for node in nodes {
        for dep in &node.depends_on {
            if !known.contains(dep.as_str()) {
                return Err(Error::InvalidGraph(GraphViolation::UnknownDependency {
                    node: node.name.clone(),
                    depends_on: dep.clone(),
                }));
            }
        }
    }

    // Kahn's algorithm; whatever cannot be ordered is the cycle set.
    let mut in_degree: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.name.as_str(), n.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        for dep in &node.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(node.name.as_str());
        }
    }

    let mut ready: Vec<&str> = nodes
        .iter()
        .filter(|n| n.depends_on.is_empty())
        .map(|n| n.name.as_str())
        .collect();
    let mut ordered = 0usize;
    while let Some(name) = ready.pop() {
        ordered += 1;
        if let Some(next) = dependents.get(name) {
            for dependent in next {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(dependent);
                    }
                }
            }
        }
    }

    if ordered < nodes.len() {
        let cycle: BTreeSet<String> = in_degree
            .iter()
            .filter(|&(_, degree)| *degree > 0)
            .map(|(name, _)| (*name).to_owned())
            .collect();
        return Err(Error::InvalidGraph(GraphViolation::CycleDetected(cycle)));
    }

    for node in nodes {
        validate(&node.step)?;
    }
    Ok(())
}

/// The channel path of a child step under `prefix`.
pub(crate) fn channel_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

fn collect_channels(step: &Step, prefix: &str, out: &mut BTreeMap<String, ChannelSpec>) {
    let path = channel_path(prefix, step.name());
    out.insert(path.clone(), ChannelSpec::new(path.clone()));
    match step {
        Step::Sequential { steps, .. } | Step::Parallel { steps, .. } => {
            for child in steps {
                collect_channels(child, &path, out);
            }
        }
        Step::Dag { nodes, .. } => {
            for node in nodes {
                collect_channels(&node.step, &path, out);
            }
        }
        Step::Branch {
            then_step,
            else_step,
            ..
        } => {
            collect_channels(then_step, &path, out);
            if let Some(else_step) = else_step {
                collect_channels(else_step, &path, out);
            }
        }
        Step::RepeatWhile { body, .. } => {
            collect_channels(body, &path, out);
        }
        Step::Router { .. }
        | Step::Transform { .. }
        | Step::Guard { .. }
        | Step::HumanApproval { .. }
        | Step::Interrupt { .. }
        | Step::AgentRun { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn noop(name: &str) -> Step {
        Step::transform(name, |x| x)
    }

    #[test]
    fn valid_trees_compile() {
        let wf = Workflow::new(
            "wf",
            Step::sequential("main", vec![noop("a"), noop("b")]),
        )
        .expect("valid");
        assert!(wf.channels().contains_key("main/a"));
        assert!(wf.channels().contains_key("main/b"));
    }

    #[test]
    fn empty_sequential_is_rejected() {
        let err = Workflow::new("wf", Step::sequential("main", vec![]))
            .expect_err("empty orchestration");
        assert!(matches!(
            err,
            Error::InvalidGraph(GraphViolation::EmptyOrchestration)
        ));
    }

    #[test]
    fn empty_dag_is_rejected() {
        let err = Workflow::new("wf", Step::dag("d", vec![])).expect_err("empty");
        assert!(matches!(
            err,
            Error::InvalidGraph(GraphViolation::EmptyOrchestration)
        ));
    }

    #[test]
    fn duplicate_dag_nodes_are_rejected() {
        let err = Workflow::new(
            "wf",
            Step::dag(
                "d",
                vec![
                    DagNode::new("a", noop("a")),
                    DagNode::new("a", noop("a2")),
                ],
            ),
        )
        .expect_err("duplicate");
        assert!(matches!(
            err,
            Error::InvalidGraph(GraphViolation::DuplicateNode(name)) if name == "a"
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = Workflow::new(
            "wf",
            Step::dag(
                "d",
                vec![DagNode::new("a", noop("a")).depends_on(["ghost"])],
            ),
        )
        .expect_err("unknown dep");
        assert!(matches!(
            err,
            Error::InvalidGraph(GraphViolation::UnknownDependency { node, depends_on })
                if node == "a" && depends_on == "ghost"
        ));
    }

    #[test]
    fn cycles_are_reported_with_their_node_set() {
        let err = Workflow::new(
            "wf",
            Step::dag(
                "d",
                vec![
                    DagNode::new("a", noop("a")).depends_on(["b"]),
                    DagNode::new("b", noop("b")).depends_on(["a"]),
                ],
            ),
        )
        .expect_err("cycle");
        assert_eq!(err.kind(), ErrorKind::InvalidGraph);
        match err {
            Error::InvalidGraph(GraphViolation::CycleDetected(nodes)) => {
                let expected: BTreeSet<String> = ["a".to_owned(), "b".to_owned()].into();
                assert_eq!(nodes, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_validation_recurses() {
        let err = Workflow::new(
            "wf",
            Step::sequential(
                "main",
                vec![Step::parallel("p", vec![])],
            ),
        )
        .expect_err("nested empty parallel");
        assert!(matches!(
            err,
            Error::InvalidGraph(GraphViolation::EmptyOrchestration)
        ));
    }

    #[test]
    fn extra_channels_must_be_unique() {
        let wf = Workflow::new("wf", noop("a")).expect("valid");
        let wf = wf
            .with_channel(ChannelSpec::new("scratch"))
            .expect("fresh channel");
        let err = wf
            .with_channel(ChannelSpec::new("scratch"))
            .expect_err("duplicate channel");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

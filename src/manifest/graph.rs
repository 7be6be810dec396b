//! Stage dependency graph
//!
//! Nodes are stages in declaration order. An edge `a -> b` means stage `a`
//! derives from or copies out of stage `b`.

use super::errors::{ManifestError, ValidationError};
use super::manifest_def::Manifest;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Dependency graph over the stages of a manifest
#[derive(Debug, Clone)]
pub struct StageGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    deps: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Builds the graph; references to unknown stages are ignored
    pub fn new(manifest: &Manifest) -> Self {
        let names: Vec<String> = manifest.stages.iter().map(|s| s.name.clone()).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(position);
        }

        let deps = manifest
            .stages
            .iter()
            .map(|stage| {
                stage
                    .references()
                    .into_iter()
                    .filter_map(|reference| index.get(reference).copied())
                    .collect()
            })
            .collect();

        Self { names, index, deps }
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the graph has no stages
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Direct dependencies of `stage`
    pub fn dependencies(&self, stage: &str) -> Option<Vec<&str>> {
        let node = *self.index.get(stage)?;
        Some(self.deps[node].iter().map(|&d| self.names[d].as_str()).collect())
    }

    /// Stages that directly depend on `stage`, in declaration order
    pub fn dependents(&self, stage: &str) -> Vec<&str> {
        let Some(&node) = self.index.get(stage) else {
            return Vec::new();
        };
        self.deps
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&node))
            .map(|(dependent, _)| self.names[dependent].as_str())
            .collect()
    }

    /// Every stage needed to build `targets`, in declaration order
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownTarget`] for a target that is not a stage.
    pub fn closure(&self, targets: &[String]) -> Result<Vec<String>, ManifestError> {
        let mut keep = BTreeSet::new();
        let mut queue = VecDeque::new();
        for target in targets {
            let node = self
                .index
                .get(target.as_str())
                .copied()
                .ok_or_else(|| ManifestError::UnknownTarget(target.clone()))?;
            queue.push_back(node);
        }

        while let Some(node) = queue.pop_front() {
            if keep.insert(node) {
                queue.extend(self.deps[node].iter().copied());
            }
        }

        Ok(keep.into_iter().map(|node| self.names[node].clone()).collect())
    }

    /// Groups the closure of `targets` (all stages when empty) into waves
    ///
    /// Every stage of a wave depends only on stages of earlier waves. Within a
    /// wave stages keep declaration order.
    ///
    /// # Errors
    ///
    /// Fails on an unknown target or when the selected stages contain a cycle.
    pub fn waves(&self, targets: &[String]) -> Result<Vec<Vec<String>>, ManifestError> {
        let selected: Vec<usize> = if targets.is_empty() {
            (0..self.names.len()).collect()
        } else {
            self.closure(targets)?
                .iter()
                .filter_map(|name| self.index.get(name.as_str()).copied())
                .collect()
        };

        let mut pending: HashMap<usize, usize> = selected
            .iter()
            .map(|&node| (node, self.deps[node].len()))
            .collect();

        let mut waves = Vec::new();
        let mut ready: Vec<usize> = selected
            .iter()
            .copied()
            .filter(|node| pending[node] == 0)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            ready.sort_unstable();
            for node in &ready {
                pending.remove(node);
            }
            placed += ready.len();

            let mut next = Vec::new();
            for (&node, remaining) in &mut pending {
                let satisfied = self.deps[node].iter().filter(|d| ready.contains(d)).count();
                *remaining -= satisfied;
                if *remaining == 0 {
                    next.push(node);
                }
            }

            waves.push(ready.iter().map(|&node| self.names[node].clone()).collect());
            ready = next;
        }

        if placed < selected.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(ValidationError::CyclicReference { cycle }.into());
        }

        Ok(waves)
    }

    /// Returns the stage path of a reference cycle, first stage repeated at the end
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            graph: &StageGraph,
            node: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[node] = Mark::Active;
            path.push(node);
            for &dep in &graph.deps[node] {
                match marks[dep] {
                    Mark::Active => {
                        let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|&n| graph.names[n].clone()).collect();
                        cycle.push(graph.names[dep].clone());
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(graph, dep, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.names.len()];
        let mut path = Vec::new();
        for node in 0..self.names.len() {
            if marks[node] == Mark::New {
                if let Some(cycle) = visit(self, node, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Stages nothing depends on
    pub fn leaves(&self) -> Vec<&str> {
        (0..self.names.len())
            .filter(|node| !self.deps.iter().any(|deps| deps.contains(node)))
            .map(|node| self.names[node].as_str())
            .collect()
    }
}

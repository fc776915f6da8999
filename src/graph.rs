//! Dependency graph levelization for phased agent startup.
//!
//! Pure, synchronous, and deterministic: given the same set of `add` calls
//! in any order, `topological_levels` always returns the same levels with
//! the same alphabetical ordering inside each level.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Errors raised while building or levelizing a dependency graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A node listed itself as one of its own dependencies.
    #[error("self dependency: {0}")]
    SelfDependency(String),

    /// A node depends on a name that was never added to the graph.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// The dependency relation contains a cycle; the string is a concrete
    /// path through it, `a -> b -> a`.
    #[error("dependency cycle: {0}")]
    Cycle(String),
}

/// A directed graph of named nodes with dependency edges, levelized for
/// phased startup.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a node and a copy of its dependencies. The caller's slice
    /// does not need to outlive this call.
    pub fn add(&mut self, name: impl Into<String>, deps: impl IntoIterator<Item = impl Into<String>>) {
        let deps = deps.into_iter().map(Into::into).collect();
        self.nodes.insert(name.into(), deps);
    }

    /// Validates the graph: every dependency must refer to a known node and
    /// the dependency relation must be acyclic. Returns the first cycle or
    /// unknown-dependency error found.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (name, deps) in &self.nodes {
            for dep in deps {
                if dep == name {
                    return Err(GraphError::SelfDependency(name.clone()));
                }
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency(dep.clone()));
                }
            }
        }
        self.detect_cycle()
    }

    /// Computes topological levels: level N holds every node whose deepest
    /// dependency chain has length N. Each level is sorted alphabetically so
    /// that the result is identical across runs for identical input.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        self.validate()?;

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();

        for name in &names {
            self.resolve_level(name, &mut level_of, &mut Vec::new())?;
        }

        let max_level = level_of.values().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
        for name in &names {
            let level = level_of[name];
            levels[level].push((*name).to_string());
        }
        for level in &mut levels {
            level.sort();
        }

        Ok(levels)
    }

    fn resolve_level<'a>(
        &'a self,
        name: &'a str,
        level_of: &mut HashMap<&'a str, usize>,
        stack: &mut Vec<&'a str>,
    ) -> Result<usize, GraphError> {
        if let Some(&level) = level_of.get(name) {
            return Ok(level);
        }
        if let Some(pos) = stack.iter().position(|n| *n == name) {
            let mut path: Vec<&str> = stack[pos..].to_vec();
            path.push(name);
            return Err(GraphError::Cycle(path.join(" -> ")));
        }

        stack.push(name);
        let deps = &self.nodes[name];
        let mut level = 0usize;
        for dep in deps {
            let dep_level = self.resolve_level(dep.as_str(), level_of, stack)?;
            level = level.max(dep_level + 1);
        }
        stack.pop();

        level_of.insert(name, level);
        Ok(level)
    }

    fn detect_cycle(&self) -> Result<(), GraphError> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();

        for start in &names {
            if visited.contains(start) {
                continue;
            }
            let mut stack = Vec::new();
            self.visit_for_cycle(start, &mut visited, &mut stack)?;
        }
        Ok(())
    }

    fn visit_for_cycle<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        if let Some(pos) = stack.iter().position(|n| *n == name) {
            let mut path: Vec<&str> = stack[pos..].to_vec();
            path.push(name);
            return Err(GraphError::Cycle(path.join(" -> ")));
        }
        if visited.contains(name) {
            return Ok(());
        }

        stack.push(name);
        for dep in &self.nodes[name] {
            self.visit_for_cycle(dep.as_str(), visited, stack)?;
        }
        stack.pop();
        visited.insert(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diamond_levelizes_deterministically() {
        let mut graph = DependencyGraph::new();
        graph.add("a", Vec::<String>::new());
        graph.add("b", vec!["a"]);
        graph.add("c", vec!["a"]);
        graph.add("d", vec!["b", "c"]);

        let levels = graph.topological_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn levels_are_deterministic_across_runs() {
        let mut graph = DependencyGraph::new();
        graph.add("d", vec!["b", "c"]);
        graph.add("c", vec!["a"]);
        graph.add("b", vec!["a"]);
        graph.add("a", Vec::<String>::new());

        let first = graph.topological_levels().unwrap();
        let second = graph.topological_levels().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add("a", vec!["a"]);
        assert_eq!(
            graph.validate(),
            Err(GraphError::SelfDependency("a".to_string()))
        );
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add("a", vec!["ghost"]);
        assert_eq!(
            graph.validate(),
            Err(GraphError::UnknownDependency("ghost".to_string()))
        );
    }

    #[test]
    fn cycle_is_rejected_with_a_concrete_path() {
        let mut graph = DependencyGraph::new();
        graph.add("a", vec!["b"]);
        graph.add("b", vec!["c"]);
        graph.add("c", vec!["a"]);

        let err = graph.validate().unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert!(path.contains("->"));
                let nodes: Vec<&str> = path.split(" -> ").collect();
                assert!(nodes.len() >= 3);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }

        assert!(graph.topological_levels().is_err());
    }

    #[test]
    fn node_with_no_deps_is_level_zero() {
        let mut graph = DependencyGraph::new();
        graph.add("lonely", Vec::<String>::new());
        let levels = graph.topological_levels().unwrap();
        assert_eq!(levels, vec![vec!["lonely".to_string()]]);
    }
}

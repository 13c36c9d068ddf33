//! CR-005: Dependency DAG construction and execution order.
//!
//! Edges run from the task declaring a path as a target to every task
//! declaring it as a file dependency. Topological order uses Kahn's
//! algorithm with registration order as the deterministic tie-breaker.

use super::error::EngineError;
use super::registry::TaskRegistry;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Upstream task indices for every task, by registration index.
fn upstream_edges(registry: &TaskRegistry) -> Vec<Vec<usize>> {
    let tasks = registry.list();
    tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let mut ups: Vec<usize> = Vec::new();
            for dep in task.file_deps() {
                for (j, producer) in tasks.iter().enumerate() {
                    if j != i && producer.targets().contains(dep) && !ups.contains(&j) {
                        ups.push(j);
                    }
                }
            }
            ups
        })
        .collect()
}

fn index_of(registry: &TaskRegistry, name: &str) -> Result<usize, EngineError> {
    registry
        .position(name)
        .ok_or_else(|| EngineError::TaskNotFound(name.to_string()))
}

/// Expand `names` with every task they transitively depend on.
/// Unknown names fail with `TaskNotFound`.
pub fn with_upstream(registry: &TaskRegistry, names: &[String]) -> Result<Vec<String>, EngineError> {
    let edges = upstream_edges(registry);
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let mut queue: VecDeque<usize> = VecDeque::new();
    for name in names {
        let idx = index_of(registry, name)?;
        if seen.insert(idx) {
            queue.push_back(idx);
        }
    }
    while let Some(current) = queue.pop_front() {
        for &up in &edges[current] {
            if seen.insert(up) {
                queue.push_back(up);
            }
        }
    }
    let all: Vec<&str> = registry.names().collect();
    Ok(seen.into_iter().map(|i| all[i].to_string()).collect())
}

/// Every task that transitively depends on `name`'s targets.
pub fn downstream_of(registry: &TaskRegistry, name: &str) -> Result<HashSet<String>, EngineError> {
    let edges = upstream_edges(registry);
    let root = index_of(registry, name)?;
    let all: Vec<&str> = registry.names().collect();
    let mut found: HashSet<usize> = HashSet::new();
    let mut queue: VecDeque<usize> = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        for (i, ups) in edges.iter().enumerate() {
            if ups.contains(&current) && found.insert(i) {
                queue.push_back(i);
            }
        }
    }
    found.remove(&root);
    Ok(found.into_iter().map(|i| all[i].to_string()).collect())
}

/// Topological order of the selected tasks (all tasks when `selected` is
/// empty), expanded with their upstream producers.
pub fn execution_order(
    registry: &TaskRegistry,
    selected: &[String],
) -> Result<Vec<String>, EngineError> {
    let all: Vec<&str> = registry.names().collect();
    let members: BTreeSet<usize> = if selected.is_empty() {
        (0..all.len()).collect()
    } else {
        with_upstream(registry, selected)?
            .iter()
            .map(|n| index_of(registry, n))
            .collect::<Result<_, _>>()?
    };

    let edges = upstream_edges(registry);
    let mut in_degree: Vec<usize> = vec![0; all.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); all.len()];
    for &i in &members {
        for &up in &edges[i] {
            if members.contains(&up) {
                in_degree[i] += 1;
                downstream[up].push(i);
            }
        }
    }

    // Ready set ordered by registration index
    let mut ready: BTreeSet<usize> = members
        .iter()
        .copied()
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(members.len());
    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &downstream[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != members.len() {
        let ordered: HashSet<usize> = order.iter().copied().collect();
        let cycle: Vec<&str> = members
            .iter()
            .filter(|i| !ordered.contains(i))
            .map(|&i| all[i])
            .collect();
        return Err(EngineError::Config(format!(
            "dependency cycle detected involving: {}",
            cycle.join(", ")
        )));
    }

    Ok(order.into_iter().map(|i| all[i].to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::FileTable;
    use crate::core::task::Task;

    fn registry(tasks: Vec<Task>) -> TaskRegistry {
        let mut reg = TaskRegistry::new();
        for t in tasks {
            let name = t.name().to_string();
            reg.register(&name, t, FileTable::new()).unwrap();
        }
        reg
    }

    fn chain() -> TaskRegistry {
        registry(vec![
            Task::builder("fit").file_dep("rbh.csv").target("model.json").build().unwrap(),
            Task::builder("rbh").file_dep("a.maf").target("rbh.csv").build().unwrap(),
            Task::builder("align").target("a.maf").build().unwrap(),
            Task::builder("unrelated").target("x.txt").build().unwrap(),
        ])
    }

    #[test]
    fn test_cr005_registration_order_without_edges() {
        let reg = registry(vec![
            Task::builder("c").build().unwrap(),
            Task::builder("a").build().unwrap(),
            Task::builder("b").build().unwrap(),
        ]);
        assert_eq!(execution_order(&reg, &[]).unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cr005_producers_first() {
        let order = execution_order(&chain(), &[]).unwrap();
        assert_eq!(order, vec!["align", "rbh", "fit", "unrelated"]);
    }

    #[test]
    fn test_cr005_subset_expands_upstream() {
        let order = execution_order(&chain(), &["rbh".to_string()]).unwrap();
        assert_eq!(order, vec!["align", "rbh"]);
    }

    #[test]
    fn test_cr005_subset_unknown_task() {
        let err = execution_order(&chain(), &["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(ref n) if n == "ghost"));
    }

    #[test]
    fn test_cr005_cycle_detected() {
        let reg = registry(vec![
            Task::builder("a").file_dep("b.txt").target("a.txt").build().unwrap(),
            Task::builder("b").file_dep("a.txt").target("b.txt").build().unwrap(),
        ]);
        let err = execution_order(&reg, &[]).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_cr005_downstream_of() {
        let down = downstream_of(&chain(), "align").unwrap();
        let expected: HashSet<String> = ["rbh", "fit"].iter().map(|s| s.to_string()).collect();
        assert_eq!(down, expected);
        assert!(downstream_of(&chain(), "unrelated").unwrap().is_empty());
    }

    #[test]
    fn test_cr005_with_upstream_keeps_registration_order() {
        let names = with_upstream(&chain(), &["fit".to_string()]).unwrap();
        assert_eq!(names, vec!["fit", "rbh", "align"]);
    }
}

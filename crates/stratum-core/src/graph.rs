use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::ModuleSet;

/// Declared dependency graph over one module set.
///
/// Always built whole from a [`ModuleSet`]; there is no incremental update.
/// Dependencies on names outside the set stay in the declared adjacency (they
/// count toward fan-out) but take no part in cycles or the reverse index.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    depends_on: BTreeMap<String, BTreeSet<String>>,
    depended_by: BTreeMap<String, BTreeSet<String>>,
}

impl ModuleGraph {
    pub fn build(modules: &ModuleSet) -> Self {
        let mut depends_on: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut depended_by: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for module in modules.iter() {
            depends_on.insert(
                module.module_name.clone(),
                module.depends_on.iter().cloned().collect(),
            );
            depended_by.entry(module.module_name.clone()).or_default();
        }
        for (name, deps) in &depends_on {
            for dep in deps {
                if let Some(users) = depended_by.get_mut(dep) {
                    users.insert(name.clone());
                }
            }
        }

        log::debug!("built dependency graph over {} modules", depends_on.len());
        Self {
            depends_on,
            depended_by,
        }
    }

    pub fn len(&self) -> usize {
        self.depends_on.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depends_on.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.depends_on.contains_key(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.depends_on.keys().map(String::as_str)
    }

    /// Declared dependencies of `name`, defined or not.
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        self.depends_on
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Modules in the set that declare a dependency on `name`.
    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &str> {
        self.depended_by
            .get(name)
            .into_iter()
            .flat_map(|users| users.iter().map(String::as_str))
    }

    pub fn out_degree(&self, name: &str) -> usize {
        self.depends_on.get(name).map_or(0, BTreeSet::len)
    }

    pub fn in_degree(&self, name: &str) -> usize {
        self.depended_by.get(name).map_or(0, BTreeSet::len)
    }

    /// Per module, the declared dependencies that name no module in the set.
    pub fn undefined_dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.depends_on
            .iter()
            .filter_map(|(name, deps)| {
                let missing: Vec<String> = deps
                    .iter()
                    .filter(|d| *d != name && !self.contains(d))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (name.clone(), missing))
            })
            .collect()
    }

    fn defined_neighbors(&self, name: &str) -> std::vec::IntoIter<&str> {
        self.dependencies(name)
            .filter(|d| self.contains(d))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Every simple dependency cycle (Johnson's algorithm, iterative).
    ///
    /// Each cycle is reported once, as the ordered module names along the
    /// cycle (closing back to the first), rotated so the smallest name leads.
    /// Cycles come out sorted. A self-dependency is a one-element cycle.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let names: Vec<&str> = self.modules().collect();
        let position: HashMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut self_loops = Vec::new();
        let adjacency: Vec<Vec<usize>> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut out = Vec::new();
                for dep in self.defined_neighbors(name) {
                    match position.get(dep) {
                        Some(&j) if j == i => self_loops.push(i),
                        Some(&j) => out.push(j),
                        None => {}
                    }
                }
                out
            })
            .collect();

        let mut found: Vec<Vec<usize>> = self_loops.into_iter().map(|i| vec![i]).collect();
        let all: Vec<usize> = (0..names.len()).collect();
        let mut pending: Vec<Vec<usize>> = strong_components(&adjacency, &all)
            .into_iter()
            .filter(|c| c.len() > 1)
            .collect();

        while let Some(component) = pending.pop() {
            let Some(&start) = component.iter().min() else {
                continue;
            };
            let mut member = vec![false; names.len()];
            for &v in &component {
                member[v] = true;
            }
            circuits_through(&adjacency, &member, start, &mut found);

            let rest: Vec<usize> = component.into_iter().filter(|&v| v != start).collect();
            pending.extend(
                strong_components(&adjacency, &rest)
                    .into_iter()
                    .filter(|c| c.len() > 1),
            );
        }

        let cycles: BTreeSet<Vec<String>> = found
            .iter()
            .map(|cycle| {
                let path: Vec<&str> = cycle.iter().map(|&i| names[i]).collect();
                rotate_to_smallest(&path)
            })
            .collect();
        cycles.into_iter().collect()
    }

    /// Dependencies before dependents, ties by name. `None` when cyclic.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .modules()
            .map(|name| (name, self.defined_neighbors(name).len()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(name) = ready.pop_first() {
            remaining.remove(name);
            order.push(name.to_string());
            for user in self.dependents(name) {
                if let Some(count) = remaining.get_mut(user) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(user);
                    }
                }
            }
        }

        remaining.is_empty().then_some(order)
    }

    /// Every defined module reachable from `name`, excluding `name` itself.
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.defined_neighbors(name).collect();

        while let Some(current) = queue.pop_front() {
            if current == name || !visited.insert(current.to_string()) {
                continue;
            }
            queue.extend(self.defined_neighbors(current));
        }
        visited
    }
}

/// Strongly connected components of the subgraph induced by `members`
/// (Tarjan, with an explicit call stack).
fn strong_components(adjacency: &[Vec<usize>], members: &[usize]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut included = vec![false; n];
    for &v in members {
        included[v] = true;
    }
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut counter = 0;
    let mut components = Vec::new();

    for &root in members {
        if index[root].is_some() {
            continue;
        }
        index[root] = Some(counter);
        low[root] = counter;
        counter += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut calls: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(&(v, next)) = calls.last() {
            if let Some(&w) = adjacency[v].get(next) {
                if let Some(top) = calls.last_mut() {
                    top.1 += 1;
                }
                if !included[w] {
                    continue;
                }
                match index[w] {
                    None => {
                        index[w] = Some(counter);
                        low[w] = counter;
                        counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        calls.push((w, 0));
                    }
                    Some(iw) if on_stack[w] => low[v] = low[v].min(iw),
                    Some(_) => {}
                }
                continue;
            }

            calls.pop();
            if let Some(&(parent, _)) = calls.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if Some(low[v]) == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

/// Johnson's circuit search: every simple cycle through `start` that stays
/// inside `member`, each pushed as a path beginning at `start`.
fn circuits_through(
    adjacency: &[Vec<usize>],
    member: &[bool],
    start: usize,
    found: &mut Vec<Vec<usize>>,
) {
    let n = adjacency.len();
    let mut blocked = vec![false; n];
    let mut blocked_by: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut path = vec![start];
    let mut closed = vec![false];
    let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
    blocked[start] = true;

    while let Some(&(v, next)) = frames.last() {
        if let Some(&w) = adjacency[v].get(next) {
            if let Some(top) = frames.last_mut() {
                top.1 += 1;
            }
            if !member[w] {
                continue;
            }
            if w == start {
                found.push(path.clone());
                if let Some(last) = closed.last_mut() {
                    *last = true;
                }
            } else if !blocked[w] {
                blocked[w] = true;
                path.push(w);
                closed.push(false);
                frames.push((w, 0));
            }
            continue;
        }

        frames.pop();
        path.pop();
        if closed.pop().unwrap_or(false) {
            if let Some(last) = closed.last_mut() {
                *last = true;
            }
            unblock(v, &mut blocked, &mut blocked_by);
        } else {
            for &w in adjacency[v].iter().filter(|&&w| member[w]) {
                blocked_by[w].insert(v);
            }
        }
    }
}

fn unblock(node: usize, blocked: &mut [bool], blocked_by: &mut [BTreeSet<usize>]) {
    let mut stack = vec![node];
    while let Some(u) = stack.pop() {
        if blocked[u] {
            blocked[u] = false;
            stack.extend(std::mem::take(&mut blocked_by[u]));
        }
    }
}

fn rotate_to_smallest(cycle: &[&str]) -> Vec<String> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map_or(0, |(i, _)| i);
    cycle[start..]
        .iter()
        .chain(cycle[..start].iter())
        .map(|s| s.to_string())
        .collect()
}

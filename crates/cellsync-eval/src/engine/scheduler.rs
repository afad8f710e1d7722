use rustc_hash::{FxHashMap, FxHashSet};

use crate::reference::CellRef;

/// Formula cell -> formula cells it reads.
pub type PrecedentMap = FxHashMap<CellRef, Vec<CellRef>>;

pub struct Scheduler<'a> {
    precedents: &'a PrecedentMap,
}

#[derive(Debug)]
pub struct Layer {
    pub vertices: Vec<CellRef>,
}

#[derive(Debug)]
pub struct Schedule {
    /// Acyclic formulas in evaluation order; cells within a layer are independent.
    pub layers: Vec<Layer>,
    pub cycles: Vec<Vec<CellRef>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(precedents: &'a PrecedentMap) -> Self {
        Self { precedents }
    }

    fn successors(&self, v: CellRef) -> &[CellRef] {
        self.precedents.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn create_schedule(&self, vertices: &[CellRef]) -> Schedule {
        let sccs = self.tarjan_scc(vertices);
        let (cycles, acyclic) = self.separate_cycles(sccs);
        let layers = self.build_layers(acyclic);
        Schedule { layers, cycles }
    }

    /// Tarjan's strongly connected components, iterative so long chains cannot
    /// exhaust the stack.
    pub fn tarjan_scc(&self, vertices: &[CellRef]) -> Vec<Vec<CellRef>> {
        let mut index_counter = 0usize;
        let mut indices: FxHashMap<CellRef, usize> = FxHashMap::default();
        let mut lowlinks: FxHashMap<CellRef, usize> = FxHashMap::default();
        let mut on_stack: FxHashSet<CellRef> = FxHashSet::default();
        let mut stack: Vec<CellRef> = Vec::new();
        let mut sccs = Vec::new();

        for &root in vertices {
            if indices.contains_key(&root) {
                continue;
            }
            indices.insert(root, index_counter);
            lowlinks.insert(root, index_counter);
            index_counter += 1;
            stack.push(root);
            on_stack.insert(root);
            let mut call_stack: Vec<(CellRef, usize)> = vec![(root, 0)];

            while let Some((v, next)) = call_stack.last_mut() {
                let v = *v;
                let succs = self.successors(v);
                if *next < succs.len() {
                    let w = succs[*next];
                    *next += 1;
                    if !indices.contains_key(&w) {
                        indices.insert(w, index_counter);
                        lowlinks.insert(w, index_counter);
                        index_counter += 1;
                        stack.push(w);
                        on_stack.insert(w);
                        call_stack.push((w, 0));
                    } else if on_stack.contains(&w) {
                        let low = lowlinks[&v].min(indices[&w]);
                        lowlinks.insert(v, low);
                    }
                    continue;
                }

                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    let low = lowlinks[&parent].min(lowlinks[&v]);
                    lowlinks.insert(parent, low);
                }
                if lowlinks[&v] == indices[&v] {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack.remove(&w);
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
            }
        }
        sccs
    }

    fn separate_cycles(&self, sccs: Vec<Vec<CellRef>>) -> (Vec<Vec<CellRef>>, Vec<CellRef>) {
        let mut cycles = Vec::new();
        let mut acyclic = Vec::new();
        for mut scc in sccs {
            if scc.len() > 1 || self.has_self_loop(scc[0]) {
                scc.sort();
                cycles.push(scc);
            } else {
                acyclic.extend(scc);
            }
        }
        (cycles, acyclic)
    }

    fn has_self_loop(&self, vertex: CellRef) -> bool {
        self.successors(vertex).contains(&vertex)
    }

    /// Kahn's algorithm over the acyclic remainder. Edges into cyclic vertices
    /// are ignored; those cells already hold their error value.
    fn build_layers(&self, acyclic: Vec<CellRef>) -> Vec<Layer> {
        let members: FxHashSet<CellRef> = acyclic.iter().copied().collect();
        let mut in_degree: FxHashMap<CellRef, usize> = FxHashMap::default();
        let mut dependents: FxHashMap<CellRef, Vec<CellRef>> = FxHashMap::default();

        for &v in &acyclic {
            let mut seen = FxHashSet::default();
            let mut degree = 0;
            for &p in self.successors(v) {
                if members.contains(&p) && seen.insert(p) {
                    degree += 1;
                    dependents.entry(p).or_default().push(v);
                }
            }
            in_degree.insert(v, degree);
        }

        let mut current: Vec<CellRef> = acyclic
            .iter()
            .copied()
            .filter(|v| in_degree[v] == 0)
            .collect();
        let mut layers = Vec::new();
        while !current.is_empty() {
            current.sort();
            let mut next = Vec::new();
            for v in &current {
                for d in dependents.get(v).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(d) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(*d);
                        }
                    }
                }
            }
            layers.push(Layer {
                vertices: std::mem::take(&mut current),
            });
            current = next;
        }
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(row: u32, col: u32) -> CellRef {
        CellRef::new(0, row, col)
    }

    #[test]
    fn two_node_cycle_is_isolated() {
        let mut edges = PrecedentMap::default();
        edges.insert(c(0, 0), vec![c(0, 1)]);
        edges.insert(c(0, 1), vec![c(0, 0)]);
        let schedule = Scheduler::new(&edges).create_schedule(&[c(0, 0), c(0, 1)]);
        assert_eq!(schedule.cycles, vec![vec![c(0, 0), c(0, 1)]]);
        assert!(schedule.layers.is_empty());
    }

    #[test]
    fn chain_is_layered_in_dependency_order() {
        // C1 <- B1 <- A1, plus a self loop on D1
        let mut edges = PrecedentMap::default();
        edges.insert(c(0, 0), vec![c(0, 1)]);
        edges.insert(c(0, 1), vec![c(0, 2)]);
        edges.insert(c(0, 2), vec![]);
        edges.insert(c(0, 3), vec![c(0, 3)]);
        let all = [c(0, 0), c(0, 1), c(0, 2), c(0, 3)];
        let schedule = Scheduler::new(&edges).create_schedule(&all);
        assert_eq!(schedule.cycles, vec![vec![c(0, 3)]]);
        let order: Vec<_> = schedule.layers.iter().map(|l| l.vertices.clone()).collect();
        assert_eq!(order, vec![vec![c(0, 2)], vec![c(0, 1)], vec![c(0, 0)]]);
    }

    #[test]
    fn long_chain_does_not_recurse() {
        let n = 50_000u32;
        let mut edges = PrecedentMap::default();
        for r in 1..n {
            edges.insert(c(r, 0), vec![c(r - 1, 0)]);
        }
        edges.insert(c(0, 0), vec![]);
        let all: Vec<_> = (0..n).map(|r| c(r, 0)).collect();
        let schedule = Scheduler::new(&edges).create_schedule(&all);
        assert!(schedule.cycles.is_empty());
        assert_eq!(schedule.layers.len(), n as usize);
    }
}

//! Connected components of the control point graph.

/// Disjoint-set forest over `0..n`.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Components of the graph on `0..n`. Each component lists its nodes in
/// ascending order; components are ordered by their smallest node. Edges
/// touching nodes outside `0..n` are ignored.
pub fn components(n: usize, edges: impl IntoIterator<Item = (usize, usize)>) -> Vec<Vec<usize>> {
    let mut sets = UnionFind::new(n);
    for (a, b) in edges {
        if a < n && b < n {
            sets.union(a, b);
        }
    }

    let mut slot_of_root: Vec<Option<usize>> = vec![None; n];
    let mut result: Vec<Vec<usize>> = Vec::new();
    for node in 0..n {
        let root = sets.find(node);
        match slot_of_root[root] {
            Some(slot) => result[slot].push(node),
            None => {
                slot_of_root[root] = Some(result.len());
                result.push(vec![node]);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_are_ordered() {
        let comps = components(6, [(4, 1), (5, 3), (3, 0)]);
        assert_eq!(comps, vec![vec![0, 3, 5], vec![1, 4], vec![2]]);
    }

    #[test]
    fn test_empty_and_out_of_range() {
        assert!(components(0, []).is_empty());
        assert_eq!(components(2, [(0, 7)]), vec![vec![0], vec![1]]);
    }
}

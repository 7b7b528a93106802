//! Randomized kd-tree forest with best-bin-first search.
//!
//! Each tree splits on a dimension drawn at random from the few with the
//! highest variance, at the mean value. Queries descend every tree, then keep
//! popping the closest unexplored branch from a shared priority queue until
//! the check budget is spent. Distances are squared Euclidean.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Dimensions considered when drawing a split
const RAND_DIMS: usize = 5;
/// Points sampled to estimate per-dimension variance
const VARIANCE_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub dist_sq: f32,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf { start: usize, end: usize },
    Split { dim: usize, value: f32, left: usize, right: usize },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    order: Vec<usize>,
}

/// Read-only after construction; safe to query from many threads.
#[derive(Debug, Clone)]
pub struct KdForest {
    dims: usize,
    data: Vec<f32>,
    trees: Vec<Tree>,
}

struct Branch {
    bound: f32,
    tree: usize,
    node: usize,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.bound == other.bound
    }
}

impl Eq for Branch {}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Branch {
    // min-heap on bound
    fn cmp(&self, other: &Self) -> Ordering {
        other.bound.total_cmp(&self.bound)
    }
}

impl KdForest {
    /// Build `trees` trees over row-major `data` of `dims` columns.
    pub fn build(data: Vec<f32>, dims: usize, trees: usize, rng: &mut StdRng) -> Self {
        let count = if dims == 0 { 0 } else { data.len() / dims };
        let mut forest = Self {
            dims,
            data,
            trees: Vec::with_capacity(trees),
        };
        for _ in 0..trees.max(1) {
            let mut order: Vec<usize> = (0..count).collect();
            order.shuffle(rng);
            let mut tree = Tree {
                nodes: Vec::new(),
                order,
            };
            if count > 0 {
                forest.build_node(&mut tree, 0, count, rng);
            }
            forest.trees.push(tree);
        }
        forest
    }

    /// Build from per-keypoint descriptors of equal length.
    pub fn from_descriptors<'a>(
        descriptors: impl IntoIterator<Item = &'a [f32]>,
        trees: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut dims = 0;
        let mut data = Vec::new();
        for d in descriptors {
            dims = d.len();
            data.extend_from_slice(d);
        }
        Self::build(data, dims, trees, rng)
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn point(&self, index: usize) -> &[f32] {
        &self.data[index * self.dims..(index + 1) * self.dims]
    }

    fn build_node(&self, tree: &mut Tree, start: usize, end: usize, rng: &mut StdRng) -> usize {
        let id = tree.nodes.len();
        tree.nodes.push(Node::Leaf { start, end });
        if end - start <= 1 {
            return id;
        }

        let (dim, value) = self.choose_split(&tree.order[start..end], rng);

        // partition around the mean
        let slice = &mut tree.order[start..end];
        let mut lo = 0;
        for i in 0..slice.len() {
            if self.point(slice[i])[dim] < value {
                slice.swap(lo, i);
                lo += 1;
            }
        }
        if lo == 0 || lo == slice.len() {
            // all equal along the chosen dimension
            return id;
        }

        let mid = start + lo;
        let left = self.build_node(tree, start, mid, rng);
        let right = self.build_node(tree, mid, end, rng);
        tree.nodes[id] = Node::Split { dim, value, left, right };
        id
    }

    fn choose_split(&self, indices: &[usize], rng: &mut StdRng) -> (usize, f32) {
        let samples = &indices[..indices.len().min(VARIANCE_SAMPLES)];
        let n = samples.len() as f32;
        let mut mean = vec![0.0f32; self.dims];
        for &i in samples {
            for (m, v) in mean.iter_mut().zip(self.point(i)) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        let mut variance: Vec<(usize, f32)> = (0..self.dims).map(|d| (d, 0.0)).collect();
        for &i in samples {
            for (d, v) in self.point(i).iter().enumerate() {
                let diff = v - mean[d];
                variance[d].1 += diff * diff;
            }
        }
        variance.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top = RAND_DIMS.min(self.dims).max(1);
        let dim = variance[rng.gen_range(0..top)].0;
        (dim, mean[dim])
    }

    fn dist_sq(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    /// The `k` approximate nearest neighbours of `query`, closest first.
    ///
    /// At most `checks` distinct points are compared; a budget at least the
    /// index size gives an exact answer.
    pub fn knn(&self, query: &[f32], k: usize, checks: usize) -> Vec<Neighbor> {
        if self.is_empty() || k == 0 || query.len() != self.dims {
            return Vec::new();
        }

        let mut visited = vec![false; self.len()];
        let mut checked = 0usize;
        let mut best: Vec<Neighbor> = Vec::with_capacity(k + 1);
        let mut heap = BinaryHeap::new();

        for tree in 0..self.trees.len() {
            self.descend(tree, 0, 0.0, query, k, &mut heap, &mut best, &mut visited, &mut checked);
        }

        while let Some(branch) = heap.pop() {
            if checked >= checks && best.len() == k {
                break;
            }
            self.descend(
                branch.tree,
                branch.node,
                branch.bound,
                query,
                k,
                &mut heap,
                &mut best,
                &mut visited,
                &mut checked,
            );
        }

        best
    }

    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        tree: usize,
        mut node: usize,
        bound: f32,
        query: &[f32],
        k: usize,
        heap: &mut BinaryHeap<Branch>,
        best: &mut Vec<Neighbor>,
        visited: &mut [bool],
        checked: &mut usize,
    ) {
        let t = &self.trees[tree];
        if t.nodes.is_empty() {
            return;
        }
        loop {
            match t.nodes[node] {
                Node::Split { dim, value, left, right } => {
                    let diff = query[dim] - value;
                    let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                    heap.push(Branch {
                        bound: bound + diff * diff,
                        tree,
                        node: far,
                    });
                    node = near;
                }
                Node::Leaf { start, end } => {
                    for &index in &t.order[start..end] {
                        if visited[index] {
                            continue;
                        }
                        visited[index] = true;
                        *checked += 1;
                        let d = Self::dist_sq(query, self.point(index));
                        if best.len() < k || d < best[best.len() - 1].dist_sq {
                            let pos = best.partition_point(|n| n.dist_sq <= d);
                            best.insert(pos, Neighbor { index, dist_sq: d });
                            best.truncate(k);
                        }
                    }
                    return;
                }
            }
        }
    }
}

/// Arena-indexed disjoint-set forest with path halving and union by size.
///
/// Used in two places: connected-component counting on the k-NN graphs, and
/// extracting fused row/column groups from the set of edges whose shrunk
/// difference vector collapsed to zero.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    n_sets: usize,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            size: vec![1; n],
            n_sets: n,
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merges the sets containing `a` and `b`; returns true if they were
    /// previously disjoint.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        self.n_sets -= 1;
        true
    }

    pub fn n_sets(&self) -> usize {
        self.n_sets
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Flattens the forest into dense group ids, numbered by first occurrence
    /// so the labelling is deterministic for a given union order.
    pub fn labels(&mut self) -> Vec<usize> {
        let n = self.parent.len();
        let mut root_to_label = vec![usize::MAX; n];
        let mut labels = Vec::with_capacity(n);
        let mut next = 0usize;
        for x in 0..n {
            let root = self.find(x);
            if root_to_label[root] == usize::MAX {
                root_to_label[root] = next;
                next += 1;
            }
            labels.push(root_to_label[root]);
        }
        labels
    }
}

//! Dominator tree and dominance frontiers.
//!
//! A block `d` **dominates** `n` if every path from the entry to `n` passes through `d`.
//! The immediate dominator of `n` is its closest strict dominator; making it the parent of
//! `n` yields the dominator tree, rooted at the entry block.
//!
//! The tree is computed with the Lengauer-Tarjan algorithm with path compression, in
//! O(E α(V)). Blocks not reachable from the entry are not part of the tree: they have no
//! immediate dominator, dominate nothing and are dominated by nothing.
//!
//! Dominance queries are answered in O(1) from the entry/exit numbering of a depth-first
//! walk over the tree.

use crate::{
    analysis::{AnalysisManager, MethodAnalysis},
    ir::{BlockId, MethodBody},
    utils::{depth_first, Visit},
    Result,
};

/// Immediate dominators of every block reachable from the entry.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    depth: Vec<u32>,
    /// Position of the first and last event of each block in the tree walk
    interval: Vec<Option<(u32, u32)>>,
    walk: Vec<Visit>,
}

impl DominatorTree {
    /// Computes the dominator tree of `body`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Invariant`] if the body has no entry block.
    pub fn compute(body: &MethodBody) -> Result<Self> {
        let Some(entry) = body.entry_block() else {
            return Err(invariant_error!("cannot compute dominators without an entry block"));
        };
        let capacity = body.block_capacity();
        let idom = LengauerTarjan::new(capacity).run(body, entry);

        let mut children = vec![Vec::new(); capacity];
        for block in body.blocks() {
            if let Some(parent) = idom[block.index()] {
                children[parent.index()].push(block);
            }
        }

        let walk = depth_first(capacity, entry, |b| children[b.index()].as_slice());
        let mut interval = vec![None; capacity];
        let mut depth = vec![0u32; capacity];
        let mut level = 0u32;
        for (pos, step) in walk.iter().enumerate() {
            match *step {
                Visit::Enter(block) => {
                    interval[block.index()] = Some((pos as u32, pos as u32));
                    depth[block.index()] = level;
                    level += 1;
                }
                Visit::Exit(block) => {
                    if let Some((_, end)) = interval[block.index()].as_mut() {
                        *end = pos as u32;
                    }
                    level -= 1;
                }
            }
        }

        Ok(DominatorTree {
            entry,
            idom,
            children,
            depth,
            interval,
            walk,
        })
    }

    /// Root of the tree.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Immediate dominator of `block`; `None` for the entry and unreachable blocks.
    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.interval.get(block.index()).is_some_and(Option::is_some)
    }

    /// Returns `true` if `a` dominates `b`. Every reachable block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(Some((a_in, a_out))), Some(Some((b_in, b_out)))) =
            (self.interval.get(a.index()), self.interval.get(b.index()))
        else {
            return false;
        };
        a_in <= b_in && b_out <= a_out
    }

    /// Returns `true` if `a` dominates `b` and differs from it.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Blocks immediately dominated by `block`, in layout order.
    #[must_use]
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(block.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distance from the entry in the tree; the entry has depth 0.
    #[must_use]
    pub fn depth(&self, block: BlockId) -> usize {
        self.depth.get(block.index()).copied().unwrap_or(0) as usize
    }

    /// Reachable blocks in pre-order: every block comes after its immediate dominator.
    #[must_use]
    pub fn preorder(&self) -> Vec<BlockId> {
        self.walk
            .iter()
            .filter_map(|step| match step {
                Visit::Enter(block) => Some(*block),
                Visit::Exit(_) => None,
            })
            .collect()
    }

    /// Walks the tree depth-first, calling `pre` on entering and `post` on leaving each
    /// block. Both share `state`.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error of a callback.
    pub fn traverse<S>(
        &self,
        state: &mut S,
        mut pre: impl FnMut(&mut S, BlockId) -> Result<()>,
        mut post: impl FnMut(&mut S, BlockId) -> Result<()>,
    ) -> Result<()> {
        for step in &self.walk {
            match *step {
                Visit::Enter(block) => pre(state, block)?,
                Visit::Exit(block) => post(state, block)?,
            }
        }
        Ok(())
    }
}

impl MethodAnalysis for DominatorTree {
    const NAME: &'static str = "dominator_tree";

    fn create(
        body: &MethodBody,
        _analyses: &mut AnalysisManager,
        _preserve: bool,
    ) -> Result<Self> {
        DominatorTree::compute(body)
    }
}

/// Working state of the Lengauer-Tarjan algorithm. Everything except `vertex` and
/// `dfnum` is indexed by DFS number.
struct LengauerTarjan {
    dfnum: Vec<Option<usize>>,
    vertex: Vec<BlockId>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    idom: Vec<usize>,
    ancestor: Vec<Option<usize>>,
    label: Vec<usize>,
    bucket: Vec<Vec<usize>>,
}

impl LengauerTarjan {
    fn new(capacity: usize) -> Self {
        Self {
            dfnum: vec![None; capacity],
            vertex: Vec::with_capacity(capacity),
            parent: Vec::with_capacity(capacity),
            semi: Vec::new(),
            idom: Vec::new(),
            ancestor: Vec::new(),
            label: Vec::new(),
            bucket: Vec::new(),
        }
    }

    fn run(mut self, body: &MethodBody, entry: BlockId) -> Vec<Option<BlockId>> {
        let capacity = self.dfnum.len();

        // DFS numbering; the parent of a block is the block on top of the active path
        let mut path: Vec<usize> = Vec::new();
        for step in depth_first(capacity, entry, |b| body.succs(b)) {
            match step {
                Visit::Enter(block) => {
                    let num = self.vertex.len();
                    self.dfnum[block.index()] = Some(num);
                    self.vertex.push(block);
                    self.parent.push(path.last().copied().unwrap_or(0));
                    path.push(num);
                }
                Visit::Exit(_) => {
                    path.pop();
                }
            }
        }

        let n = self.vertex.len();
        self.semi = (0..n).collect();
        self.idom = vec![0; n];
        self.ancestor = vec![None; n];
        self.label = (0..n).collect();
        self.bucket = vec![Vec::new(); n];

        for w in (1..n).rev() {
            for &pred in body.preds(self.vertex[w]) {
                let Some(v) = self.dfnum[pred.index()] else {
                    continue;
                };
                let u = self.eval(v);
                if self.semi[u] < self.semi[w] {
                    self.semi[w] = self.semi[u];
                }
            }
            self.bucket[self.semi[w]].push(w);

            let parent = self.parent[w];
            self.ancestor[w] = Some(parent);

            for v in std::mem::take(&mut self.bucket[parent]) {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] < self.semi[v] { u } else { parent };
            }
        }

        for w in 1..n {
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }

        let mut result = vec![None; capacity];
        for w in 1..n {
            result[self.vertex[w].index()] = Some(self.vertex[self.idom[w]]);
        }
        result
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v].is_none() {
            return v;
        }
        self.compress(v);
        self.label[v]
    }

    /// Path compression, iteratively from the forest root down to `v`.
    fn compress(&mut self, v: usize) {
        let mut path = Vec::new();
        let mut node = v;
        while let Some(ancestor) = self.ancestor[node] {
            if self.ancestor[ancestor].is_none() {
                break;
            }
            path.push(node);
            node = ancestor;
        }

        for &node in path.iter().rev() {
            let Some(ancestor) = self.ancestor[node] else {
                continue;
            };
            if self.semi[self.label[ancestor]] < self.semi[self.label[node]] {
                self.label[node] = self.label[ancestor];
            }
            self.ancestor[node] = self.ancestor[ancestor];
        }
    }
}

/// Dominance frontier of every reachable block.
///
/// The frontier of `a` holds every block `b` such that `a` dominates a predecessor of `b`
/// without strictly dominating `b`: the points where `a`'s dominance stops.
#[derive(Debug, Clone)]
pub struct DominanceFrontier {
    frontiers: Vec<Vec<BlockId>>,
}

impl DominanceFrontier {
    /// Computes frontiers by walking up from the predecessors of every join block.
    #[must_use]
    pub fn compute(body: &MethodBody, doms: &DominatorTree) -> Self {
        let mut frontiers: Vec<Vec<BlockId>> = vec![Vec::new(); body.block_capacity()];
        for block in body.blocks() {
            let preds = body.preds(block);
            if preds.len() < 2 || !doms.is_reachable(block) {
                continue;
            }
            let stop = doms.idom(block);
            for &pred in preds {
                let mut runner = Some(pred).filter(|p| doms.is_reachable(*p));
                while let Some(current) = runner {
                    if Some(current) == stop {
                        break;
                    }
                    let frontier = &mut frontiers[current.index()];
                    if !frontier.contains(&block) {
                        frontier.push(block);
                    }
                    runner = doms.idom(current);
                }
            }
        }
        DominanceFrontier { frontiers }
    }

    /// Frontier of `block`.
    #[must_use]
    pub fn of(&self, block: BlockId) -> &[BlockId] {
        self.frontiers.get(block.index()).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl MethodAnalysis for DominanceFrontier {
    const NAME: &'static str = "dominance_frontier";

    fn create(body: &MethodBody, analyses: &mut AnalysisManager, preserve: bool) -> Result<Self> {
        let doms = analyses.get::<DominatorTree>(body, preserve)?;
        Ok(DominanceFrontier::compute(body, &doms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::IrType, ir::InstKind};

    /// Builds a body with `n` blocks and the given edges, using switches as terminators.
    fn graph(n: usize, edges: &[(usize, usize)]) -> (MethodBody, Vec<BlockId>) {
        let mut body = MethodBody::new(vec![IrType::I32], IrType::Void);
        let blocks: Vec<BlockId> = (0..n).map(|_| body.create_block(None)).collect();
        for (i, &block) in blocks.iter().enumerate() {
            let targets: Vec<BlockId> = edges
                .iter()
                .filter(|(from, _)| *from == i)
                .map(|(_, to)| blocks[*to])
                .collect();
            let term = match targets.split_last() {
                None => body.create_inst(InstKind::Return, vec![], IrType::Void),
                Some((&default, rest)) => body.create_inst(
                    InstKind::Switch {
                        targets: rest.to_vec(),
                        default,
                    },
                    vec![body.arg(0)],
                    IrType::Void,
                ),
            }
            .unwrap();
            body.insert_last(block, term).unwrap();
        }
        (body, blocks)
    }

    #[test]
    fn test_linear_chain() {
        let (body, b) = graph(4, &[(0, 1), (1, 2), (2, 3)]);
        let doms = DominatorTree::compute(&body).unwrap();
        assert_eq!(doms.entry(), b[0]);
        assert_eq!(doms.idom(b[0]), None);
        assert_eq!(doms.idom(b[3]), Some(b[2]));
        assert!(doms.dominates(b[0], b[3]));
        assert!(doms.dominates(b[2], b[2]));
        assert!(!doms.strictly_dominates(b[2], b[2]));
        assert!(!doms.dominates(b[3], b[1]));
        assert_eq!(doms.depth(b[3]), 3);
        assert_eq!(doms.preorder(), b);
    }

    #[test]
    fn test_diamond() {
        let (body, b) = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let doms = DominatorTree::compute(&body).unwrap();
        assert_eq!(doms.idom(b[3]), Some(b[0]));
        assert!(!doms.dominates(b[1], b[3]));
        assert_eq!(doms.children(b[0]), &[b[1], b[2], b[3]]);

        let df = DominanceFrontier::compute(&body, &doms);
        assert!(df.of(b[0]).is_empty());
        assert_eq!(df.of(b[1]), &[b[3]]);
        assert_eq!(df.of(b[2]), &[b[3]]);
        assert!(df.of(b[3]).is_empty());
    }

    #[test]
    fn test_loop() {
        // 0 -> 1 (header) -> 2 (body) -> 1, 1 -> 3 (exit)
        let (body, b) = graph(4, &[(0, 1), (1, 2), (1, 3), (2, 1)]);
        let doms = DominatorTree::compute(&body).unwrap();
        assert_eq!(doms.idom(b[2]), Some(b[1]));
        assert_eq!(doms.idom(b[3]), Some(b[1]));

        let df = DominanceFrontier::compute(&body, &doms);
        assert_eq!(df.of(b[2]), &[b[1]]);
        assert_eq!(df.of(b[1]), &[b[1]]);
    }

    #[test]
    fn test_semidominator_differs_from_idom() {
        // Classic case where the DFS parent is not the immediate dominator:
        // 0 -> 1 -> 2 -> 3, 0 -> 4 -> 3, 3 -> 5, 2 -> 5
        let (body, b) = graph(6, &[(0, 1), (0, 4), (1, 2), (2, 3), (2, 5), (4, 3), (3, 5)]);
        let doms = DominatorTree::compute(&body).unwrap();
        assert_eq!(doms.idom(b[1]), Some(b[0]));
        assert_eq!(doms.idom(b[2]), Some(b[1]));
        assert_eq!(doms.idom(b[3]), Some(b[0]));
        assert_eq!(doms.idom(b[4]), Some(b[0]));
        assert_eq!(doms.idom(b[5]), Some(b[0]));
    }

    #[test]
    fn test_unreachable_blocks() {
        let (body, b) = graph(3, &[(0, 1), (2, 1)]);
        let doms = DominatorTree::compute(&body).unwrap();
        assert_eq!(doms.idom(b[1]), Some(b[0]));
        assert!(!doms.is_reachable(b[2]));
        assert!(!doms.dominates(b[2], b[1]));
        assert!(!doms.dominates(b[0], b[2]));
        assert_eq!(doms.preorder(), vec![b[0], b[1]]);
    }

    #[test]
    fn test_traverse_pre_and_post() {
        let (body, _) = graph(3, &[(0, 1), (0, 2)]);
        let doms = DominatorTree::compute(&body).unwrap();
        let mut log = Vec::new();
        doms.traverse(
            &mut log,
            |log, block| {
                log.push(format!("+{block}"));
                Ok(())
            },
            |log, block| {
                log.push(format!("-{block}"));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(log, vec!["+BB_0", "+BB_1", "-BB_1", "+BB_2", "-BB_2", "-BB_0"]);
    }

    #[test]
    fn test_manager_shares_tree_with_frontier() {
        let (body, b) = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let mut analyses = AnalysisManager::new();
        let df = analyses.get::<DominanceFrontier>(&body, true).unwrap();
        assert_eq!(df.of(b[1]), &[b[3]]);
        assert!(analyses.is_cached::<DominatorTree>(&body));
        assert_eq!(analyses.len(), 2);
    }

    #[test]
    fn test_frontier_without_preserve_caches_nothing() {
        let (body, b) = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let mut analyses = AnalysisManager::new();
        let df = analyses.get::<DominanceFrontier>(&body, false).unwrap();
        assert_eq!(df.of(b[2]), &[b[3]]);
        assert!(!analyses.is_cached::<DominatorTree>(&body));
        assert!(analyses.is_empty());
    }

    #[test]
    fn test_no_entry_is_error() {
        let body = MethodBody::new(vec![], IrType::Void);
        assert!(DominatorTree::compute(&body).is_err());
    }
}

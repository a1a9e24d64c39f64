//! Iterative depth-first traversal over block graphs.
//!
//! Both the control-flow graph and the dominator tree are walked with an explicit stack
//! of enter/exit events, so deep graphs never recurse on the call stack.

use crate::ir::BlockId;

/// One step of a depth-first walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// First arrival at a node, before any of its successors
    Enter(BlockId),
    /// Departure from a node, after all of its successors
    Exit(BlockId),
}

/// Walks every node reachable from `root` and returns the enter/exit event sequence.
///
/// Successors are entered in the order `successors` yields them. `capacity` bounds the
/// node indices.
pub fn depth_first<'a, S>(capacity: usize, root: BlockId, successors: S) -> Vec<Visit>
where
    S: Fn(BlockId) -> &'a [BlockId],
{
    let mut visited = vec![false; capacity];
    let mut events = Vec::with_capacity(capacity * 2);
    let mut stack = vec![Visit::Enter(root)];

    while let Some(step) = stack.pop() {
        match step {
            Visit::Enter(node) => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                events.push(step);
                stack.push(Visit::Exit(node));
                for &succ in successors(node).iter().rev() {
                    if !visited[succ.index()] {
                        stack.push(Visit::Enter(succ));
                    }
                }
            }
            Visit::Exit(_) => events.push(step),
        }
    }
    events
}

//! Control-flow queries over IR functions.

use std::collections::VecDeque;

use super::{BlockId, IrFunction, Terminator};

/// Predecessor lists indexed by block.
#[must_use]
pub fn predecessors(function: &IrFunction) -> Vec<Vec<BlockId>> {
    let mut predecessors = vec![Vec::new(); function.blocks.len()];
    for block in &function.blocks {
        for succ in successors_of(block.terminator.as_ref()) {
            if let Some(preds) = predecessors.get_mut(succ.0) {
                preds.push(block.id);
            }
        }
    }
    predecessors
}

fn successors_of(terminator: Option<&Terminator>) -> Vec<BlockId> {
    terminator.map(Terminator::successors).unwrap_or_default()
}

/// Blocks reachable from the entry, indexed by block.
#[must_use]
pub fn reachable(function: &IrFunction) -> Vec<bool> {
    let mut reachable = vec![false; function.blocks.len()];
    if reachable.is_empty() {
        return reachable;
    }
    let mut queue = VecDeque::from([BlockId(0)]);
    reachable[0] = true;
    while let Some(block) = queue.pop_front() {
        let terminator = function.block(block).and_then(|block| block.terminator.as_ref());
        for succ in successors_of(terminator) {
            if let Some(seen) = reachable.get_mut(succ.0) {
                if !*seen {
                    *seen = true;
                    queue.push_back(succ);
                }
            }
        }
    }
    reachable
}

/// Edges `(from, to)` whose target is on the current depth-first path, i.e.
/// loop back-edges.
#[must_use]
pub fn back_edges(function: &IrFunction) -> Vec<(BlockId, BlockId)> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let count = function.blocks.len();
    let mut marks = vec![Mark::Unvisited; count];
    let mut edges = Vec::new();
    if count == 0 {
        return edges;
    }
    // Explicit stack of (block, next successor index).
    let mut stack: Vec<(BlockId, usize)> = vec![(BlockId(0), 0)];
    marks[0] = Mark::OnStack;
    while let Some((block, next)) = stack.last().copied() {
        let succs = successors_of(function.block(block).and_then(|b| b.terminator.as_ref()));
        if let Some(succ) = succs.get(next).copied() {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            match marks.get(succ.0).copied() {
                Some(Mark::Unvisited) => {
                    marks[succ.0] = Mark::OnStack;
                    stack.push((succ, 0));
                }
                Some(Mark::OnStack) => edges.push((block, succ)),
                Some(Mark::Done) | None => {}
            }
        } else {
            marks[block.0] = Mark::Done;
            stack.pop();
        }
    }
    edges
}

/// Block order of a function whose control flow is a single path of
/// unconditional branches, or `None` if any block has several successors.
#[must_use]
pub fn straight_line_order(function: &IrFunction) -> Option<Vec<BlockId>> {
    let mut order = Vec::new();
    let mut visited = vec![false; function.blocks.len()];
    let mut current = function.blocks.first().map(|block| block.id);
    while let Some(block_id) = current {
        if std::mem::replace(visited.get_mut(block_id.0)?, true) {
            return None;
        }
        order.push(block_id);
        current = match function.block(block_id)?.terminator.as_ref()? {
            Terminator::Branch { target, .. } => Some(*target),
            Terminator::Return(_) | Terminator::Unreachable => None,
            Terminator::CondBranch { .. } | Terminator::SwitchEnum { .. } => return None,
        };
    }
    Some(order)
}

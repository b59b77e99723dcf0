//! CFG analyses: predecessors, topological order, dominators and the
//! natural-loop forest.

use std::collections::HashMap;

use tracing::debug;

use crate::ir::{BlockId, Function, Terminator};
use crate::{IrError, IrResult};

/// Predecessor lists, indexed by block id. Deterministic: edges appear in
/// (source block, successor position) order.
pub fn predecessors(func: &Function) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); func.blocks.len()];
    for (i, block) in func.blocks.iter().enumerate() {
        for succ in block.terminator.successors() {
            preds[succ.0 as usize].push(BlockId(i as u32));
        }
    }
    preds
}

/// Reverse post-order over the blocks reachable from the entry. Every
/// forward edge goes left to right in this order; only loop back edges go
/// right to left.
pub fn topological_order(func: &Function) -> IrResult<Vec<BlockId>> {
    if func.blocks.is_empty() {
        return Err(IrError::EmptyFunction {
            function: func.name.clone(),
        });
    }

    let n = func.blocks.len();
    let mut state = vec![0u8; n]; // 0 unvisited, 1 on stack, 2 done
    let mut postorder = Vec::with_capacity(n);
    // Iterative DFS; the explicit stack holds (block, next successor index).
    let mut stack: Vec<(BlockId, usize)> = vec![(func.entry(), 0)];
    state[0] = 1;

    while let Some((block, succ_idx)) = stack.pop() {
        let succs = func.block(block).terminator.successors();
        if succ_idx < succs.len() {
            stack.push((block, succ_idx + 1));
            let next = succs[succ_idx];
            if state[next.0 as usize] == 0 {
                state[next.0 as usize] = 1;
                stack.push((next, 0));
            }
        } else {
            state[block.0 as usize] = 2;
            postorder.push(block);
        }
    }

    let unreachable = n - postorder.len();
    if unreachable > 0 {
        debug!(
            function = func.name.as_str(),
            count = unreachable,
            "dropping unreachable blocks"
        );
    }

    postorder.reverse();
    Ok(postorder)
}

/// Immediate dominators of the reachable blocks, computed with the iterative
/// Cooper-Harvey-Kennedy scheme over the reverse post-order.
pub fn dominators(func: &Function, order: &[BlockId]) -> Vec<Option<BlockId>> {
    let n = func.blocks.len();
    let mut rpo_index = vec![usize::MAX; n];
    for (i, b) in order.iter().enumerate() {
        rpo_index[b.0 as usize] = i;
    }

    let preds = predecessors(func);
    let mut idom: Vec<Option<BlockId>> = vec![None; n];
    idom[func.entry().0 as usize] = Some(func.entry());

    let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| -> BlockId {
        while a != b {
            while rpo_index[a.0 as usize] > rpo_index[b.0 as usize] {
                a = idom[a.0 as usize].expect("processed block must have an idom");
            }
            while rpo_index[b.0 as usize] > rpo_index[a.0 as usize] {
                b = idom[b.0 as usize].expect("processed block must have an idom");
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for b in order.iter().skip(1) {
            let mut new_idom: Option<BlockId> = None;
            for p in &preds[b.0 as usize] {
                if rpo_index[p.0 as usize] == usize::MAX || idom[p.0 as usize].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => *p,
                    Some(cur) => intersect(&idom, *p, cur),
                });
            }
            if new_idom.is_some() && idom[b.0 as usize] != new_idom {
                idom[b.0 as usize] = new_idom;
                changed = true;
            }
        }
    }

    idom
}

/// Whether `a` dominates `b`, given the idom array.
fn dominates(idom: &[Option<BlockId>], entry: BlockId, a: BlockId, b: BlockId) -> bool {
    let mut cur = b;
    loop {
        if cur == a {
            return true;
        }
        if cur == entry {
            return false;
        }
        match idom[cur.0 as usize] {
            Some(d) => cur = d,
            None => return false,
        }
    }
}

/// Index of a loop within its [`LoopForest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub u32);

/// A natural loop: a header dominating one or more latch blocks.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// Sources of the back edges into the header.
    pub latches: Vec<BlockId>,
    /// All member blocks, header first, remaining in reverse post-order.
    pub blocks: Vec<BlockId>,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// The loop nesting forest of one function.
#[derive(Debug, Clone)]
pub struct LoopForest {
    loops: Vec<Loop>,
    /// Innermost containing loop per block.
    block_loop: HashMap<BlockId, LoopId>,
}

impl LoopForest {
    /// Detect natural loops. Fails on irreducible control flow: a retreating
    /// edge whose target does not dominate its source.
    pub fn analyze(func: &Function, order: &[BlockId]) -> IrResult<LoopForest> {
        let n = func.blocks.len();
        let mut rpo_index = vec![usize::MAX; n];
        for (i, b) in order.iter().enumerate() {
            rpo_index[b.0 as usize] = i;
        }
        let idom = dominators(func, order);
        let preds = predecessors(func);
        let entry = func.entry();

        // Group back edges by header so a loop with several latches stays one
        // loop.
        let mut latches_by_header: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        for b in order {
            for succ in func.block(*b).terminator.successors() {
                if rpo_index[succ.0 as usize] == usize::MAX {
                    continue;
                }
                if rpo_index[succ.0 as usize] <= rpo_index[b.0 as usize] {
                    // Retreating edge; reducible only if the target dominates
                    // the source.
                    if !dominates(&idom, entry, succ, *b) {
                        return Err(IrError::IrreducibleControlFlow {
                            function: func.name.clone(),
                        });
                    }
                    match latches_by_header.iter_mut().find(|(h, _)| *h == succ) {
                        Some((_, latches)) => latches.push(*b),
                        None => latches_by_header.push((succ, vec![*b])),
                    }
                }
            }
        }

        let mut loops = Vec::new();
        for (header, latches) in latches_by_header {
            let mut members = vec![header];
            let mut work: Vec<BlockId> = latches.clone();
            while let Some(b) = work.pop() {
                if members.contains(&b) {
                    continue;
                }
                members.push(b);
                for p in &preds[b.0 as usize] {
                    if rpo_index[p.0 as usize] != usize::MAX {
                        work.push(*p);
                    }
                }
            }
            // Header first, body in reverse post-order.
            members[1..].sort_by_key(|b| rpo_index[b.0 as usize]);
            loops.push(Loop {
                header,
                latches,
                blocks: members,
                parent: None,
                children: Vec::new(),
            });
        }

        // A nested loop has strictly fewer blocks than any loop containing
        // it, so the smallest containing loop is the parent.
        for i in 0..loops.len() {
            let mut parent: Option<usize> = None;
            for (j, candidate) in loops.iter().enumerate() {
                if i == j || !candidate.contains(loops[i].header) {
                    continue;
                }
                if candidate.blocks.len() <= loops[i].blocks.len() {
                    continue;
                }
                match parent {
                    Some(p) if loops[p].blocks.len() <= candidate.blocks.len() => {}
                    _ => parent = Some(j),
                }
            }
            if let Some(p) = parent {
                loops[i].parent = Some(LoopId(p as u32));
                loops[p].children.push(LoopId(i as u32));
            }
        }

        let mut block_loop = HashMap::new();
        for (i, lp) in loops.iter().enumerate() {
            for b in &lp.blocks {
                match block_loop.get(b) {
                    // Keep the innermost (smallest) loop for each block.
                    Some(prev) => {
                        let prev: &LoopId = prev;
                        if loops[prev.0 as usize].blocks.len() > lp.blocks.len() {
                            block_loop.insert(*b, LoopId(i as u32));
                        }
                    }
                    None => {
                        block_loop.insert(*b, LoopId(i as u32));
                    }
                }
            }
        }

        Ok(LoopForest { loops, block_loop })
    }

    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost_loop(&self, block: BlockId) -> Option<LoopId> {
        self.block_loop.get(&block).copied()
    }

    /// Whether `block` is the header of some loop; returns it.
    pub fn loop_with_header(&self, block: BlockId) -> Option<LoopId> {
        self.loops
            .iter()
            .position(|l| l.header == block)
            .map(|i| LoopId(i as u32))
    }

    /// All loops, innermost first (children strictly before parents).
    pub fn innermost_first(&self) -> Vec<LoopId> {
        let mut ids: Vec<LoopId> = (0..self.loops.len() as u32).map(LoopId).collect();
        ids.sort_by_key(|id| {
            let lp = &self.loops[id.0 as usize];
            (lp.blocks.len(), lp.header)
        });
        ids
    }

    /// Loops not nested in any other.
    pub fn top_level(&self) -> Vec<LoopId> {
        (0..self.loops.len() as u32)
            .map(LoopId)
            .filter(|id| self.loops[id.0 as usize].parent.is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Value;

    fn cond() -> Value {
        Value::ConstInt { width: 1, value: 1 }
    }

    /// entry -> a -> b -> exit, with a diamond through c.
    fn diamond() -> Function {
        let mut f = Function::new("diamond", vec![], None);
        let entry = f.add_block("entry");
        let a = f.add_block("a");
        let c = f.add_block("c");
        let exit = f.add_block("exit");
        f.set_terminator(
            entry,
            Terminator::CondBr {
                cond: cond(),
                on_true: a,
                on_false: c,
            },
        );
        f.set_terminator(a, Terminator::Br { target: exit });
        f.set_terminator(c, Terminator::Br { target: exit });
        f.set_terminator(exit, Terminator::Ret { value: None });
        f
    }

    #[test]
    fn topological_order_respects_edges() {
        let f = diamond();
        let order = topological_order(&f).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], BlockId(0));
        assert_eq!(order[3], BlockId(3));
    }

    #[test]
    fn diamond_has_no_loops() {
        let f = diamond();
        let order = topological_order(&f).unwrap();
        let forest = LoopForest::analyze(&f, &order).unwrap();
        assert!(forest.is_empty());
    }

    #[test]
    fn simple_loop_is_detected() {
        let mut f = Function::new("looped", vec![], None);
        let entry = f.add_block("entry");
        let header = f.add_block("header");
        let body = f.add_block("body");
        let exit = f.add_block("exit");
        f.set_terminator(entry, Terminator::Br { target: header });
        f.set_terminator(
            header,
            Terminator::CondBr {
                cond: cond(),
                on_true: body,
                on_false: exit,
            },
        );
        f.set_terminator(body, Terminator::Br { target: header });
        f.set_terminator(exit, Terminator::Ret { value: None });

        let order = topological_order(&f).unwrap();
        let forest = LoopForest::analyze(&f, &order).unwrap();
        assert_eq!(forest.len(), 1);
        let lp = forest.get(LoopId(0));
        assert_eq!(lp.header, header);
        assert_eq!(lp.latches, vec![body]);
        assert!(lp.contains(body));
        assert!(!lp.contains(exit));
        assert_eq!(forest.innermost_loop(body), Some(LoopId(0)));
        assert_eq!(forest.innermost_loop(exit), None);
    }

    #[test]
    fn irreducible_cfg_is_rejected() {
        // Two blocks jumping into each other with two distinct entries.
        let mut f = Function::new("irreducible", vec![], None);
        let entry = f.add_block("entry");
        let a = f.add_block("a");
        let b = f.add_block("b");
        f.set_terminator(
            entry,
            Terminator::CondBr {
                cond: cond(),
                on_true: a,
                on_false: b,
            },
        );
        f.set_terminator(a, Terminator::Br { target: b });
        f.set_terminator(b, Terminator::Br { target: a });

        let order = topological_order(&f).unwrap();
        assert!(matches!(
            LoopForest::analyze(&f, &order),
            Err(IrError::IrreducibleControlFlow { .. })
        ));
    }
}

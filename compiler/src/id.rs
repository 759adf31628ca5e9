// id.rs — Arena identifiers for IR function bodies
//
// Instructions and blocks live in per-function arenas and are referred to by
// index. IDs are assigned in creation order (the arena length at push time)
// and never reused, so printing and interpretation are deterministic.

/// Index of an instruction in its function's instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Index of a basic block in its function's block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

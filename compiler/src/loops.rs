// loops.rs — Counted loop skeleton for expanded functions
//
// Shape:
//
//   entry:      loop-invariant setup, then `br label %loop.cond`
//   loop.cond:  %iv = phi i32 [ %start, %entry ], [ %iv.next, %loop.body ]
//               %more = icmp ult i32 %iv, %end
//               br i1 %more, label %loop.body, label %loop.exit
//   loop.body:  per-element work, then %iv.next = add nuw i32 %iv, 1
//   loop.exit:  ret void
//
// The condition is tested before the first iteration, so `start >= end`
// runs the body zero times.
//
// Preconditions: the builder's function has no blocks yet.
// Postconditions: after `close`, all four blocks end in a terminator.
// Side effects: none.

use crate::builder::FunctionBuilder;
use crate::id::BlockId;
use crate::ir::{BinOp, CmpPred, Value};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBlocks {
    pub init: BlockId,
    pub cond: BlockId,
    pub body: BlockId,
    pub exit: BlockId,
}

/// An open loop: the header has been emitted and the builder sits in the
/// body.
#[derive(Debug, Clone, PartialEq)]
pub struct CountedLoop {
    pub blocks: LoopBlocks,
    pub iv: Value,
}

impl LoopBlocks {
    /// Append the four loop blocks and position the builder in `entry`.
    pub fn create(b: &mut FunctionBuilder<'_, '_>) -> Self {
        let blocks = Self {
            init: b.append_block("entry"),
            cond: b.append_block("loop.cond"),
            body: b.append_block("loop.body"),
            exit: b.append_block("loop.exit"),
        };
        b.position_at_end(blocks.init);
        blocks
    }

    /// Terminate `entry`, emit the header, and position the builder at the
    /// start of the body.
    pub fn open(self, b: &mut FunctionBuilder<'_, '_>, start: Value, end: Value) -> CountedLoop {
        b.br(self.cond);

        b.position_at_end(self.cond);
        let iv = b.phi(Type::i32(), "iv");
        b.add_incoming(&iv, start, self.init);
        let more = b.icmp(CmpPred::Ult, iv.clone(), end, "more");
        b.cond_br(more, self.body, self.exit);

        b.position_at_end(self.body);
        CountedLoop { blocks: self, iv }
    }
}

impl CountedLoop {
    /// Emit the latch at the end of the current block and the exit block.
    pub fn close(self, b: &mut FunctionBuilder<'_, '_>) {
        let latch = b.current_block();
        let next = b.binary(BinOp::Add, self.iv.clone(), Value::i32(1), true, "iv.next");
        b.add_incoming(&self.iv, next, latch);
        b.br(self.blocks.cond);

        b.position_at_end(self.blocks.exit);
        b.ret(None);
    }
}

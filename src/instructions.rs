//! Flat instruction stream consumed by program lowering.
//!
//! A block is an immutable instruction list; jump targets are `(block,
//! offset)` pointers and may reference other blocks. The variant set is
//! closed: lowering dispatches exhaustively over it.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::{
    quant::{ChannelSet, MeasurementWindow},
    waveform::Waveform,
};

#[derive(Debug, Clone, Default)]
pub struct InstructionBlock {
    instructions: Vec<Instruction>,
}

/// Jump target: a position inside an instruction block.
#[derive(Debug, Clone)]
pub struct InstructionPointer {
    block: Arc<InstructionBlock>,
    offset: usize,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    /// Emit one waveform.
    Exec(Waveform),
    /// Execute the target slice `count` times.
    RepJ { count: u64, target: InstructionPointer },
    /// Unconditional jump.
    Goto(InstructionPointer),
    /// Per-channel-set dispatch.
    Chan(HashMap<ChannelSet, InstructionPointer>),
    /// Attach measurement windows to the current position.
    Meas(Vec<MeasurementWindow>),
    /// End of a block.
    Stop,
}

impl InstructionBlock {
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The instructions from `offset` to the end of the block.
    #[must_use]
    pub fn slice_from(&self, offset: usize) -> &[Instruction] {
        self.instructions.get(offset..).unwrap_or(&[])
    }

    /// The instructions from `offset` up to, but not including, the trailing
    /// terminator of the block.
    #[must_use]
    pub fn body_from(&self, offset: usize) -> &[Instruction] {
        let end = self.instructions.len().saturating_sub(1);
        self.instructions.get(offset..end).unwrap_or(&[])
    }
}

impl InstructionPointer {
    #[must_use]
    pub const fn new(block: Arc<InstructionBlock>, offset: usize) -> Self {
        Self { block, offset }
    }

    #[must_use]
    pub fn block(&self) -> &Arc<InstructionBlock> {
        &self.block
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl Instruction {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Exec(_) => "EXEC",
            Self::RepJ { .. } => "REPJ",
            Self::Goto(_) => "GOTO",
            Self::Chan(_) => "CHAN",
            Self::Meas(_) => "MEAS",
            Self::Stop => "STOP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices() {
        let block = InstructionBlock::new(vec![
            Instruction::Stop,
            Instruction::Stop,
            Instruction::Stop,
        ]);
        assert_eq!(block.slice_from(1).len(), 2);
        assert_eq!(block.body_from(0).len(), 2);
        assert_eq!(block.body_from(2).len(), 0);
        assert_eq!(block.body_from(9).len(), 0);
        assert_eq!(InstructionBlock::default().body_from(0).len(), 0);
    }

    #[test]
    fn kinds() {
        assert_eq!(Instruction::Stop.kind(), "STOP");
        assert_eq!(Instruction::Meas(Vec::new()).kind(), "MEAS");
    }
}

//! Lowering a flat instruction stream into one loop tree per channel set.
//!
//! Lowering walks the instruction block with an explicit stack of frames, one
//! frame per entered block slice. A CHAN instruction whose keys do not
//! contain the current channel set interrupts the walk: the work list is
//! split into one entry per CHAN key, each continuing from the same position
//! with its own copy of the partially built tree.

use std::collections::VecDeque;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    diagnostics::DiagnosticSink,
    error::{Error, Result},
    instructions::{Instruction, InstructionBlock},
    program::loops::Loop,
    quant::{ChannelId, ChannelSet},
};

/// One loop program per maximal set of co-defined channels.
#[derive(Debug, Clone)]
pub struct MultiChannelProgram {
    programs: HashMap<ChannelSet, Loop>,
}

#[derive(Debug, Clone)]
struct Frame {
    location: Vec<usize>,
    remaining: VecDeque<Instruction>,
}

/// Why the inner lowering routine stopped early.
enum Interrupt {
    /// A CHAN instruction requires narrower channel sets.
    Split(Vec<ChannelSet>),
    Fatal(Error),
}

impl From<Error> for Interrupt {
    fn from(error: Error) -> Self {
        Self::Fatal(error)
    }
}

impl MultiChannelProgram {
    /// Lowers `block`, discovering the initial channel set from the first
    /// waveform or CHAN instruction reachable from its start.
    ///
    /// # Errors
    ///
    /// Fails if no channel set can be discovered, or if lowering fails.
    pub fn from_block(block: &InstructionBlock, sink: &mut dyn DiagnosticSink) -> Result<Self> {
        let channels =
            find_defined_channels(block.instructions()).ok_or(Error::NoDefinedChannels)?;
        Self::lower(block, channels, sink)
    }

    /// Lowers `block` for an explicit channel set; `None` entries are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Fails when lowering fails, e.g. on a waveform that does not cover the
    /// channel set.
    pub fn with_channels(
        block: &InstructionBlock,
        channels: impl IntoIterator<Item = Option<ChannelId>>,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Self> {
        let channels = channels.into_iter().flatten().collect();
        Self::lower(block, channels, sink)
    }

    /// Wraps an already lowered program; its channel set is taken from the
    /// first waveform of the depth-first iteration.
    ///
    /// # Errors
    ///
    /// Fails if the program contains no waveform.
    pub fn from_loop(mut program: Loop, sink: &mut dyn DiagnosticSink) -> Result<Self> {
        let channels = program
            .iter_depth_first(program.root())
            .find_map(|node| program.waveform(node).map(|w| w.defined_channels().clone()))
            .ok_or(Error::NoDefinedChannels)?;
        program.cleanup(sink);
        let mut programs = HashMap::new();
        programs.insert(channels, program);
        Ok(Self { programs })
    }

    fn lower(
        block: &InstructionBlock,
        channels: ChannelSet,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Self> {
        let mut programs: HashMap<ChannelSet, Loop> = HashMap::new();
        let initial = Frame {
            location: Vec::new(),
            remaining: block.instructions().iter().cloned().collect(),
        };
        let mut work = vec![(channels, Loop::new(), vec![initial])];

        while let Some((chans, mut root, mut stack)) = work.pop() {
            match lower_for_channels(&chans, &mut root, &mut stack) {
                Ok(()) => {
                    programs.insert(chans, root);
                }
                Err(Interrupt::Split(new_sets)) => {
                    for new_channels in new_sets {
                        assert!(
                            new_channels.is_subset(&chans),
                            "channel split must narrow the channel set"
                        );
                        assert!(
                            !programs.contains_key(&new_channels)
                                && work.iter().all(|(c, ..)| *c != new_channels),
                            "channel split produced a duplicate channel set"
                        );
                        work.push((
                            new_channels,
                            root.copy_tree_structure(root.root()),
                            stack.clone(),
                        ));
                    }
                }
                Err(Interrupt::Fatal(error)) => return Err(error),
            }
        }

        for program in programs.values_mut() {
            program.cleanup(sink);
        }
        Ok(Self { programs })
    }

    #[must_use]
    pub const fn programs(&self) -> &HashMap<ChannelSet, Loop> {
        &self.programs
    }

    #[must_use]
    pub fn into_programs(self) -> HashMap<ChannelSet, Loop> {
        self.programs
    }

    /// Union of all channel sets.
    #[must_use]
    pub fn channels(&self) -> ChannelSet {
        self.programs.keys().flatten().cloned().collect()
    }

    /// The program whose channel set is a superset of `channels`.
    ///
    /// # Errors
    ///
    /// Fails if no program covers `channels`.
    pub fn get(&self, channels: &ChannelSet) -> Result<&Loop> {
        self.programs
            .iter()
            .find(|(key, _)| channels.is_subset(key))
            .map(|(_, program)| program)
            .ok_or_else(|| Error::UnknownChannels(channels.clone()))
    }

    /// The program defined on the single channel `channel`.
    ///
    /// # Errors
    ///
    /// Fails if no program covers the channel.
    pub fn get_channel(&self, channel: &ChannelId) -> Result<&Loop> {
        self.get(&[channel.clone()].into_iter().collect())
    }
}

fn lower_for_channels(
    channels: &ChannelSet,
    root: &mut Loop,
    stack: &mut Vec<Frame>,
) -> std::result::Result<(), Interrupt> {
    while let Some(mut frame) = stack.pop() {
        let current = root.locate(&frame.location)?;
        while let Some(instruction) = frame.remaining.pop_front() {
            match instruction {
                Instruction::Exec(waveform) => {
                    if !waveform.defined_channels().is_superset(channels) {
                        return Err(Interrupt::Fatal(Error::ChannelMismatch {
                            defined: waveform.defined_channels().clone(),
                            required: channels.clone(),
                        }));
                    }
                    root.append_child(current, Loop::new().with_waveform(waveform));
                }
                Instruction::RepJ { count, target } => {
                    let child =
                        root.append_child(current, Loop::new().with_repetition(count)?);
                    if !frame.remaining.is_empty() {
                        stack.push(Frame {
                            location: frame.location.clone(),
                            remaining: std::mem::take(&mut frame.remaining),
                        });
                    }
                    stack.push(Frame {
                        location: root.location(child),
                        remaining: target
                            .block()
                            .body_from(target.offset())
                            .iter()
                            .cloned()
                            .collect(),
                    });
                    break;
                }
                Instruction::Chan(mapping) => {
                    if let Some(target) = mapping.get(channels) {
                        // splice the chosen sub-block onto the front
                        for instruction in target.block().body_from(target.offset()).iter().rev()
                        {
                            frame.remaining.push_front(instruction.clone());
                        }
                    } else {
                        let new_sets = mapping.keys().cloned().sorted().collect();
                        // restore the CHAN so every split continues from here
                        frame.remaining.push_front(Instruction::Chan(mapping));
                        stack.push(frame);
                        return Err(Interrupt::Split(new_sets));
                    }
                }
                Instruction::Meas(windows) => {
                    root.add_measurements(current, windows);
                }
                Instruction::Stop => break,
                Instruction::Goto(_) => {
                    return Err(Interrupt::Fatal(Error::UnhandledInstruction("GOTO")));
                }
            }
        }
    }
    Ok(())
}

/// Walks the instructions, following REPJ and GOTO targets, and yields the
/// channel set of the first waveform reached or the union of the first CHAN
/// instruction's keys.
fn find_defined_channels(instructions: &[Instruction]) -> Option<ChannelSet> {
    for instruction in instructions {
        match instruction {
            Instruction::Exec(waveform) => return Some(waveform.defined_channels().clone()),
            Instruction::RepJ { target, .. } | Instruction::Goto(target) => {
                let found = find_defined_channels(target.block().slice_from(target.offset()));
                if found.is_some() {
                    return found;
                }
            }
            Instruction::Chan(mapping) => {
                return Some(mapping.keys().flatten().cloned().collect());
            }
            Instruction::Meas(_) => {}
            Instruction::Stop => return None,
        }
    }
    None
}

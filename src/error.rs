use thiserror::Error;

use crate::quant::{ChannelSet, Time};

/// Fatal failures of program construction, transformation or lowering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("time denominator must not be zero")]
    ZeroDenominator,
    #[error("time values must be non-negative, got {numer}/{denom}")]
    NegativeTime { numer: i64, denom: i64 },
    #[error("repetition count must be at least 1")]
    ZeroRepetitionCount,
    #[error("volatile repetition evaluated to {0}, expected a positive integer")]
    InvalidRepetitionValue(i64),
    #[error("unknown parameter `{0}` in repetition expression")]
    UnknownParameter(String),
    #[error("leaves cannot be unrolled")]
    UnrollLeaf,
    #[error("the root loop has no parent to unroll into")]
    UnrollRoot,
    #[error("cannot split child {index}: repetition count {count} is not larger than 1")]
    SplitRepetition { index: usize, count: u64 },
    #[error("there is no child with repetition count > 1")]
    NoSplitCandidate,
    #[error("no node at path {0:?}")]
    InvalidPath(Vec<usize>),
    #[error("waveform channels {defined:?} do not cover the lowered channels {required:?}")]
    ChannelMismatch {
        defined: ChannelSet,
        required: ChannelSet,
    },
    #[error("instruction block has no defined channels")]
    NoDefinedChannels,
    #[error("encountered unhandled {0} instruction during lowering")]
    UnhandledInstruction(&'static str),
    #[error("no program is defined on channels {0:?}")]
    UnknownChannels(ChannelSet),
    #[error("program duration in samples {0} is not an integer")]
    DurationNotInteger(Time),
    #[error("program duration in samples {samples} is shorter than the minimal length {min_len}")]
    DurationTooShort { samples: Time, min_len: u64 },
    #[error("program duration in samples {samples} is not a multiple of the quantum {quantum}")]
    DurationNotMultiple { samples: Time, quantum: u64 },
    #[error("cannot render a waveform from a loop without a waveform payload")]
    MissingWaveform,
}

pub type Result<T> = std::result::Result<T, Error>;

//! Loop-tree programs: construction, structural transforms, lowering from
//! instruction blocks and rewriting for device compatibility.

mod compat;
mod loops;
mod lower;

pub use self::{
    compat::{CompatibilityLevel, check_compatibility, make_compatible, to_waveform},
    loops::{CleanupAction, DurationStructure, Loop, Repetition},
    lower::MultiChannelProgram,
};

//! Waveform values carried by loop leaves.
//!
//! The program representation never samples waveforms; it only needs their
//! duration, their channel set and value equality. A [`SegmentWaveform`] is
//! the opaque payload handed over by the pulse front-end, while
//! [`SequenceWaveform`] and [`RepetitionWaveform`] are produced when a
//! subtree is collapsed back into a single waveform.

use std::{fmt, sync::Arc};

use crate::quant::{ChannelSet, Time};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Waveform {
    Segment(SegmentWaveform),
    Sequence(SequenceWaveform),
    Repetition(RepetitionWaveform),
}

/// Opaque sampled segment with a known duration and channel set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentWaveform {
    id: Arc<str>,
    duration: Time,
    channels: ChannelSet,
}

/// Concatenation of waveforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceWaveform {
    parts: Arc<[Waveform]>,
    duration: Time,
    channels: ChannelSet,
}

/// A waveform repeated a fixed number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepetitionWaveform {
    body: Arc<Waveform>,
    count: u64,
}

impl Waveform {
    #[must_use]
    pub fn duration(&self) -> Time {
        match self {
            Self::Segment(w) => w.duration(),
            Self::Sequence(w) => w.duration(),
            Self::Repetition(w) => w.duration(),
        }
    }

    #[must_use]
    pub fn defined_channels(&self) -> &ChannelSet {
        match self {
            Self::Segment(w) => w.defined_channels(),
            Self::Sequence(w) => w.defined_channels(),
            Self::Repetition(w) => w.defined_channels(),
        }
    }
}

impl SegmentWaveform {
    pub fn new(id: impl Into<Arc<str>>, duration: Time, channels: ChannelSet) -> Self {
        Self {
            id: id.into(),
            duration,
            channels,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn duration(&self) -> Time {
        self.duration
    }

    #[must_use]
    pub const fn defined_channels(&self) -> &ChannelSet {
        &self.channels
    }
}

impl SequenceWaveform {
    #[must_use]
    pub fn new(parts: Vec<Waveform>) -> Self {
        let duration = parts.iter().map(Waveform::duration).sum();
        let channels = parts
            .iter()
            .flat_map(|w| w.defined_channels().iter().cloned())
            .collect();
        Self {
            parts: parts.into(),
            duration,
            channels,
        }
    }

    #[must_use]
    pub fn parts(&self) -> &[Waveform] {
        &self.parts
    }

    #[must_use]
    pub const fn duration(&self) -> Time {
        self.duration
    }

    #[must_use]
    pub const fn defined_channels(&self) -> &ChannelSet {
        &self.channels
    }
}

impl RepetitionWaveform {
    #[must_use]
    pub fn new(body: Waveform, count: u64) -> Self {
        Self {
            body: Arc::new(body),
            count,
        }
    }

    #[must_use]
    pub fn body(&self) -> &Waveform {
        &self.body
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn duration(&self) -> Time {
        self.body.duration() * self.count
    }

    #[must_use]
    pub fn defined_channels(&self) -> &ChannelSet {
        self.body.defined_channels()
    }
}

impl From<SegmentWaveform> for Waveform {
    fn from(w: SegmentWaveform) -> Self {
        Self::Segment(w)
    }
}

impl From<SequenceWaveform> for Waveform {
    fn from(w: SequenceWaveform) -> Self {
        Self::Sequence(w)
    }
}

impl From<RepetitionWaveform> for Waveform {
    fn from(w: RepetitionWaveform) -> Self {
        Self::Repetition(w)
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment(w) => write!(f, "{}", w.id),
            Self::Sequence(w) => {
                write!(f, "(")?;
                for (i, part) in w.parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
            Self::Repetition(w) => write!(f, "{} x {}", w.count, w.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::ChannelId;

    fn channels(names: &[&str]) -> ChannelSet {
        names.iter().map(|&n| ChannelId::new(n)).collect()
    }

    fn segment(id: &str, duration: u64, chans: &[&str]) -> Waveform {
        SegmentWaveform::new(id, Time::from_int(duration), channels(chans)).into()
    }

    #[test]
    fn sequence_sums_durations_and_merges_channels() {
        let seq = SequenceWaveform::new(vec![segment("a", 3, &["x"]), segment("b", 5, &["y"])]);
        assert_eq!(seq.duration(), Time::from_int(8));
        assert_eq!(seq.defined_channels(), &channels(&["x", "y"]));
    }

    #[test]
    fn repetition_scales_duration() {
        let rep = RepetitionWaveform::new(segment("a", 3, &["x"]), 4);
        assert_eq!(rep.duration(), Time::from_int(12));
        assert_eq!(rep.defined_channels(), &channels(&["x"]));
    }

    #[test]
    fn equality_is_structural() {
        let a = segment("a", 3, &["x"]);
        let b = segment("a", 3, &["x"]);
        assert_eq!(a, b);
        assert_ne!(a, segment("a", 4, &["x"]));
        assert_eq!(
            Waveform::from(SequenceWaveform::new(vec![a.clone(), b.clone()])),
            Waveform::from(SequenceWaveform::new(vec![b, a])),
        );
    }

    #[test]
    fn display_is_compact() {
        let seq: Waveform = SequenceWaveform::new(vec![
            segment("a", 3, &["x"]),
            RepetitionWaveform::new(segment("b", 1, &["x"]), 2).into(),
        ])
        .into();
        assert_eq!(seq.to_string(), "(a + 2 x b)");
    }
}

//! Device compatibility: classifying a program against AWG constraints and
//! rewriting it in place until every emitted waveform satisfies them.
//!
//! A waveform is playable when its sample count is an integer of at least
//! `min_len` samples and a multiple of the sample `quantum`. Subtrees that
//! violate this are concatenated back into single waveforms, unrolling
//! repetitions when even one run of the body is too short.

use crate::{
    diagnostics::{Diagnostic, DiagnosticSink, VolatileOperation},
    error::{Error, Result},
    program::loops::{Loop, Repetition},
    quant::Time,
    tree::NodeId,
    waveform::{RepetitionWaveform, SequenceWaveform, Waveform},
};

/// Classification of a (sub)program against the device constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityLevel {
    /// Every emitted waveform satisfies the constraints.
    Compatible,
    /// Violations exist but can be rewritten away locally.
    ActionRequired,
    /// The total duration is below the minimal waveform length.
    IncompatibleTooShort,
    /// The total duration is not an integer number of samples.
    IncompatibleFraction,
    /// The total duration is not a multiple of the sample quantum.
    IncompatibleQuantum,
}

#[derive(Debug, Clone, Copy)]
struct Constraints {
    min_len: u64,
    quantum: u64,
    sample_rate: Time,
}

impl CompatibilityLevel {
    #[must_use]
    pub const fn is_incompatible(self) -> bool {
        matches!(
            self,
            Self::IncompatibleTooShort | Self::IncompatibleFraction | Self::IncompatibleQuantum
        )
    }
}

/// Classifies `program` against the device constraints.
pub fn check_compatibility(
    program: &Loop,
    minimal_waveform_length: u64,
    waveform_quantum: u64,
    sample_rate: Time,
    sink: &mut dyn DiagnosticSink,
) -> CompatibilityLevel {
    let constraints = Constraints {
        min_len: minimal_waveform_length,
        quantum: waveform_quantum,
        sample_rate,
    };
    classify(program, program.root(), &constraints, sink)
}

/// Checks `program` against the device constraints and rewrites it in place
/// if necessary and possible.
///
/// # Errors
///
/// Fails when the total program duration itself violates the constraints:
/// fractional sample count, shorter than `minimal_waveform_length`, or not a
/// multiple of `waveform_quantum`.
pub fn make_compatible(
    program: &mut Loop,
    minimal_waveform_length: u64,
    waveform_quantum: u64,
    sample_rate: Time,
    sink: &mut dyn DiagnosticSink,
) -> Result<()> {
    let constraints = Constraints {
        min_len: minimal_waveform_length,
        quantum: waveform_quantum,
        sample_rate,
    };
    let samples = program.duration(program.root()) * sample_rate;
    match classify(program, program.root(), &constraints, sink) {
        CompatibilityLevel::IncompatibleFraction => Err(Error::DurationNotInteger(samples)),
        CompatibilityLevel::IncompatibleTooShort => Err(Error::DurationTooShort {
            samples,
            min_len: minimal_waveform_length,
        }),
        CompatibilityLevel::IncompatibleQuantum => Err(Error::DurationNotMultiple {
            samples,
            quantum: waveform_quantum,
        }),
        CompatibilityLevel::Compatible => Ok(()),
        CompatibilityLevel::ActionRequired => {
            sink.emit(Diagnostic::MakeCompatible);
            rewrite(program, program.root(), &constraints, sink)
        }
    }
}

fn classify(
    program: &Loop,
    node: NodeId,
    constraints: &Constraints,
    sink: &mut dyn DiagnosticSink,
) -> CompatibilityLevel {
    let samples = program.duration(node) * constraints.sample_rate;
    if !samples.is_integer() {
        return CompatibilityLevel::IncompatibleFraction;
    }
    if samples < Time::from_int(constraints.min_len) {
        return CompatibilityLevel::IncompatibleTooShort;
    }
    if !samples.is_multiple_of(constraints.quantum) {
        return CompatibilityLevel::IncompatibleQuantum;
    }
    let compatible = if program.is_leaf(node) {
        let body_samples = program.body_duration(node) * constraints.sample_rate;
        body_samples >= Time::from_int(constraints.min_len)
            && body_samples.is_multiple_of(constraints.quantum)
    } else {
        program
            .children(node)
            .iter()
            .all(|&child| {
                classify(program, child, constraints, sink) == CompatibilityLevel::Compatible
            })
    };
    if compatible {
        CompatibilityLevel::Compatible
    } else {
        if program.is_volatile(node) {
            sink.emit(Diagnostic::VolatileModification(
                VolatileOperation::MakeCompatible,
            ));
        }
        CompatibilityLevel::ActionRequired
    }
}

fn rewrite(
    program: &mut Loop,
    node: NodeId,
    constraints: &Constraints,
    sink: &mut dyn DiagnosticSink,
) -> Result<()> {
    if program.is_leaf(node) {
        // a leaf only gets here because its body is too short or off-quantum:
        // bake the repetitions into the waveform itself
        let rendered = to_waveform(&program.copy_tree_structure(node))?;
        program.set_waveform(node, Some(rendered));
        program.set_repetition(node, Repetition::Fixed(1));
        return Ok(());
    }

    let levels: Vec<(NodeId, CompatibilityLevel)> = program
        .children(node)
        .iter()
        .map(|&child| (child, classify(program, child, constraints, sink)))
        .collect();

    if levels.iter().any(|&(_, level)| level.is_incompatible()) {
        let count = program.repetition_count(node);
        let single_run = program.duration(node) * constraints.sample_rate / count;
        let preserve_repetition = single_run.is_multiple_of(constraints.quantum)
            && single_run >= Time::from_int(constraints.min_len);
        let rendered = if preserve_repetition {
            // concatenating one run of the body is enough
            let mut copy = program.copy_tree_structure(node);
            let copy_root = copy.root();
            copy.set_repetition_count(copy_root, 1)?;
            to_waveform(&copy)?
        } else {
            // concatenate and unroll the repetitions
            to_waveform(&program.copy_tree_structure(node))?
        };
        program.remove_children(node);
        program.set_waveform(node, Some(rendered));
        if !preserve_repetition {
            program.set_repetition(node, Repetition::Fixed(1));
        }
        return Ok(());
    }

    for (child, level) in levels {
        if level == CompatibilityLevel::ActionRequired {
            rewrite(program, child, constraints, sink)?;
        }
    }
    Ok(())
}

/// Renders a loop tree back into a single waveform.
///
/// # Errors
///
/// Fails if the tree contains a leaf without a waveform.
pub fn to_waveform(program: &Loop) -> Result<Waveform> {
    render(program, program.root())
}

fn render(program: &Loop, node: NodeId) -> Result<Waveform> {
    let count = program.repetition_count(node);
    if program.is_leaf(node) {
        let waveform = program.waveform(node).cloned().ok_or(Error::MissingWaveform)?;
        if count > 1 {
            Ok(RepetitionWaveform::new(waveform, count).into())
        } else {
            Ok(waveform)
        }
    } else {
        let inner = if program.child_count(node) == 1 {
            render(program, program.children(node)[0])?
        } else {
            let parts = program
                .children(node)
                .iter()
                .map(|&child| render(program, child))
                .collect::<Result<Vec<_>>>()?;
            SequenceWaveform::new(parts).into()
        };
        if count > 1 {
            Ok(RepetitionWaveform::new(inner, count).into())
        } else {
            Ok(inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diagnostics::DiagnosticBuffer,
        parameter::MappedParameter,
        quant::ChannelId,
        waveform::SegmentWaveform,
    };

    fn wf(id: &str, duration: u64) -> Waveform {
        SegmentWaveform::new(
            id,
            Time::from_int(duration),
            [ChannelId::new("ch")].into_iter().collect(),
        )
        .into()
    }

    fn leaf(id: &str, duration: u64) -> Loop {
        Loop::new().with_waveform(wf(id, duration))
    }

    fn check(program: &Loop, min_len: u64, quantum: u64) -> CompatibilityLevel {
        check_compatibility(
            program,
            min_len,
            quantum,
            Time::from_int(1),
            &mut DiagnosticBuffer::new(),
        )
    }

    #[test]
    fn classification_of_total_duration() {
        let program = leaf("a", 3);
        assert_eq!(check(&program, 8, 1), CompatibilityLevel::IncompatibleTooShort);
        let program = leaf("a", 6);
        assert_eq!(check(&program, 4, 4), CompatibilityLevel::IncompatibleQuantum);
        let program = leaf("a", 3);
        let level = check_compatibility(
            &program,
            1,
            1,
            Time::from_fraction(1, 2).unwrap(),
            &mut DiagnosticBuffer::new(),
        );
        assert_eq!(level, CompatibilityLevel::IncompatibleFraction);
        let program = leaf("a", 8);
        assert_eq!(check(&program, 8, 4), CompatibilityLevel::Compatible);
    }

    #[test]
    fn fatal_levels_surface_their_values() {
        let mut program = leaf("a", 3);
        let result = make_compatible(
            &mut program,
            8,
            4,
            Time::from_int(1),
            &mut DiagnosticBuffer::new(),
        );
        assert_eq!(
            result,
            Err(Error::DurationTooShort {
                samples: Time::from_int(3),
                min_len: 8,
            })
        );
    }

    #[test]
    fn compatible_program_is_untouched() {
        let mut program = leaf("a", 8).with_repetition(2).unwrap();
        let before = program.clone();
        let mut sink = DiagnosticBuffer::new();
        make_compatible(&mut program, 8, 4, Time::from_int(1), &mut sink).unwrap();
        assert_eq!(program, before);
        assert!(sink.is_empty());
    }

    #[test]
    fn short_leaf_bakes_repetitions_into_the_waveform() {
        let mut program = leaf("a", 3).with_repetition(4).unwrap();
        let mut sink = DiagnosticBuffer::new();
        make_compatible(&mut program, 8, 4, Time::from_int(1), &mut sink).unwrap();
        let root = program.root();
        assert_eq!(program.repetition_count(root), 1);
        assert_eq!(
            program.waveform(root),
            Some(&RepetitionWaveform::new(wf("a", 3), 4).into())
        );
        assert_eq!(program.duration(root), Time::from_int(12));
        assert_eq!(check(&program, 8, 4), CompatibilityLevel::Compatible);
        assert_eq!(sink.diagnostics(), &[Diagnostic::MakeCompatible]);
    }

    #[test]
    fn collapse_preserves_repetition_when_one_run_fits() {
        let mut program = Loop::new()
            .with_repetition(2)
            .unwrap()
            .with_children(vec![leaf("a", 3), leaf("b", 5)]);
        make_compatible(
            &mut program,
            8,
            4,
            Time::from_int(1),
            &mut DiagnosticBuffer::new(),
        )
        .unwrap();
        let root = program.root();
        assert!(program.is_leaf(root));
        assert_eq!(program.repetition_count(root), 2);
        assert_eq!(
            program.waveform(root),
            Some(&SequenceWaveform::new(vec![wf("a", 3), wf("b", 5)]).into())
        );
        assert_eq!(program.duration(root), Time::from_int(16));
        assert_eq!(check(&program, 8, 4), CompatibilityLevel::Compatible);
    }

    #[test]
    fn collapse_unrolls_when_one_run_is_too_short() {
        let mut program = Loop::new()
            .with_repetition(2)
            .unwrap()
            .with_children(vec![leaf("a", 3), leaf("b", 3)]);
        make_compatible(
            &mut program,
            8,
            4,
            Time::from_int(1),
            &mut DiagnosticBuffer::new(),
        )
        .unwrap();
        let root = program.root();
        assert!(program.is_leaf(root));
        assert_eq!(program.repetition_count(root), 1);
        assert_eq!(program.duration(root), Time::from_int(12));
        assert_eq!(check(&program, 8, 4), CompatibilityLevel::Compatible);
    }

    #[test]
    fn volatile_subtrees_warn_when_action_is_required() {
        let program = leaf("a", 3)
            .with_repetition_parameter(MappedParameter::named_constant("n", 4))
            .unwrap();
        let mut sink = DiagnosticBuffer::new();
        let level = check_compatibility(&program, 8, 4, Time::from_int(1), &mut sink);
        assert_eq!(level, CompatibilityLevel::ActionRequired);
        assert_eq!(
            sink.diagnostics(),
            &[Diagnostic::VolatileModification(
                VolatileOperation::MakeCompatible
            )]
        );
    }

    #[test]
    fn rewrite_drops_volatility_on_leaves() {
        let mut program = leaf("a", 3)
            .with_repetition_parameter(MappedParameter::named_constant("n", 4))
            .unwrap();
        make_compatible(
            &mut program,
            8,
            4,
            Time::from_int(1),
            &mut DiagnosticBuffer::new(),
        )
        .unwrap();
        assert!(!program.is_volatile(program.root()));
        assert_eq!(program.repetition_count(program.root()), 1);
    }

    #[test]
    fn nested_action_recurses_into_children() {
        // the first child is fine, the second needs its repetitions baked in
        let mut program = Loop::new().with_children(vec![
            leaf("a", 8),
            leaf("b", 2).with_repetition(4).unwrap(),
        ]);
        make_compatible(
            &mut program,
            8,
            4,
            Time::from_int(1),
            &mut DiagnosticBuffer::new(),
        )
        .unwrap();
        let root = program.root();
        assert_eq!(program.child_count(root), 2);
        let second = program.children(root)[1];
        assert_eq!(program.repetition_count(second), 1);
        assert_eq!(
            program.waveform(second),
            Some(&RepetitionWaveform::new(wf("b", 2), 4).into())
        );
        assert_eq!(check(&program, 8, 4), CompatibilityLevel::Compatible);
    }

    #[test]
    fn to_waveform_preserves_duration_and_skips_single_wrappers() {
        let program = Loop::new()
            .with_repetition(2)
            .unwrap()
            .with_children(vec![Loop::new().with_children(vec![
                leaf("a", 1).with_repetition(3).unwrap(),
            ])]);
        let rendered = to_waveform(&program).unwrap();
        assert_eq!(rendered.duration(), program.duration(program.root()));
        assert_eq!(
            rendered,
            RepetitionWaveform::new(RepetitionWaveform::new(wf("a", 1), 3).into(), 2).into()
        );
    }

    #[test]
    fn to_waveform_needs_payloads() {
        let program = Loop::new();
        assert_eq!(to_waveform(&program), Err(Error::MissingWaveform));
    }
}

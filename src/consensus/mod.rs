//! Consensus read building.
//!
//! One leg of a duplicate group — a buffer of reads that all arose from the
//! same physical molecule — is collapsed into a single consensus read. Legs
//! whose reads are indel-free go through the alignment-only builder in
//! [`aligned`]; legs with insertions or deletions go through the
//! descriptor-checking builder in [`indel`]. Both paths thread one owned
//! [`ConsensusBuilder`] through their steps, so the two never alias state.
//!
//! Every outcome is a structured tag: resolvable disagreements degrade the
//! call quality, descriptor conflicts degrade the outcome, and only
//! collaborator failures (reference lookup) surface as errors.

pub mod aligned;
pub mod indel;

use crate::read::{AlignedRead, AttrKey, AttrValue, Cigar};
use crate::reference::ReferenceLookup;
use crate::errors::Result;

/// Prefix used when deriving a consensus read identifier.
pub const CONSENSUS_NAME_PREFIX: &str = "CNS_";

/// Attribute carrying the total number of contributing reads.
pub const CONSENSUS_TOTAL_TAG: AttrKey = *b"cN";

/// Attribute carrying the first-of-pair count among contributing reads.
pub const CONSENSUS_FIRST_OF_PAIR_TAG: AttrKey = *b"cF";

/// Attribute carrying the consensus type (the outcome's string form).
pub const CONSENSUS_TYPE_TAG: AttrKey = *b"cT";

/// Supplementary-alignment attribute, carried over from the representative.
pub const SUPPLEMENTARY_ALIGNMENT_TAG: AttrKey = *b"SA";

/// How a leg's consensus build concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsensusOutcome {
    /// No build has run (single-read legs stay here).
    #[default]
    Unset,
    /// Indel-free leg collapsed by per-base voting.
    AlignmentOnly,
    /// Indel-bearing leg with consistent descriptors, collapsed and
    /// reconstructed.
    IndelMatch,
    /// Indel-bearing leg whose descriptors disagree; no consensus produced.
    IndelMismatch,
    /// Descriptor reconstruction hit an unresolvable contradiction; no
    /// consensus produced.
    IndelFail,
}

impl ConsensusOutcome {
    /// Stable string form, used for the consensus-type attribute.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusOutcome::Unset => "UNSET",
            ConsensusOutcome::AlignmentOnly => "ALIGNMENT_ONLY",
            ConsensusOutcome::IndelMatch => "INDEL_MATCH",
            ConsensusOutcome::IndelMismatch => "INDEL_MISMATCH",
            ConsensusOutcome::IndelFail => "INDEL_FAIL",
        }
    }

    /// True when the build produced a consensus base/quality array.
    #[must_use]
    pub fn produced_consensus(self) -> bool {
        matches!(self, ConsensusOutcome::AlignmentOnly | ConsensusOutcome::IndelMatch)
    }
}

/// Mutable state for one leg's consensus build.
///
/// Created when a leg reaches its required read count, threaded by `&mut`
/// through the builder steps, and consumed when the consensus read is
/// synthesized.
#[derive(Debug)]
pub struct ConsensusBuilder {
    /// Output base buffer.
    pub(crate) bases: Vec<u8>,
    /// Output quality buffer.
    pub(crate) quals: Vec<u8>,
    /// Output alignment descriptor under construction.
    pub(crate) cigar: Cigar,
    /// 1-based alignment start of the consensus under construction.
    pub(crate) start: u64,
    /// Smallest unclipped start across the leg's reads.
    pub(crate) min_unclipped_start: u64,
    /// Largest unclipped end across the leg's reads.
    pub(crate) max_unclipped_end: u64,
    /// Smallest alignment start across the leg's reads.
    pub(crate) min_aligned_start: u64,
    /// Largest alignment end across the leg's reads.
    pub(crate) max_aligned_end: u64,
    /// Orientation of the leg (from its first read).
    pub(crate) reverse: bool,
    /// Working length: the longest read in the leg.
    pub(crate) working_len: usize,
    /// Outcome tag for the build.
    pub(crate) outcome: ConsensusOutcome,
}

impl ConsensusBuilder {
    /// Creates build state for a leg, aggregating the template's outer span
    /// across its reads.
    ///
    /// # Panics
    ///
    /// Panics if `reads` is empty; callers gate on the leg's read count.
    #[must_use]
    pub fn for_leg(reads: &[AlignedRead]) -> Self {
        assert!(!reads.is_empty(), "a consensus build needs at least one read");

        let working_len = reads.iter().map(AlignedRead::len).max().unwrap_or(0);
        let min_unclipped_start =
            reads.iter().map(AlignedRead::unclipped_start).min().unwrap_or(0);
        let max_unclipped_end = reads.iter().map(AlignedRead::unclipped_end).max().unwrap_or(0);
        let min_aligned_start = reads.iter().map(|r| r.start).min().unwrap_or(0);
        let max_aligned_end = reads.iter().map(AlignedRead::alignment_end).max().unwrap_or(0);

        Self {
            bases: Vec::with_capacity(working_len),
            quals: Vec::with_capacity(working_len),
            cigar: Cigar::new(),
            start: min_aligned_start,
            min_unclipped_start,
            max_unclipped_end,
            min_aligned_start,
            max_aligned_end,
            reverse: reads[0].reverse,
            working_len,
            outcome: ConsensusOutcome::Unset,
        }
    }

    /// The outcome tag of the build so far.
    #[must_use]
    pub fn outcome(&self) -> ConsensusOutcome {
        self.outcome
    }

    /// Leftmost genomic position of the working window.
    ///
    /// Forward legs anchor on their shared 5' unclipped start; reverse legs
    /// anchor on their shared 3' unclipped end, so the window counts back
    /// from it.
    pub(crate) fn window_start(&self) -> u64 {
        if self.reverse {
            self.max_unclipped_end.saturating_sub(self.working_len.saturating_sub(1) as u64)
        } else {
            self.min_unclipped_start
        }
    }

    /// Genomic position of output index `i`.
    pub(crate) fn ref_pos(&self, i: usize) -> u64 {
        self.window_start() + i as u64
    }
}

/// The result of collapsing one leg.
#[derive(Debug)]
pub struct LegConsensus {
    /// How the build concluded.
    pub outcome: ConsensusOutcome,
    /// The synthesized consensus read, when the outcome produced one.
    pub read: Option<AlignedRead>,
}

impl LegConsensus {
    fn none(outcome: ConsensusOutcome) -> Self {
        Self { outcome, read: None }
    }
}

/// Collapses one leg's reads into a consensus read.
///
/// Single-read legs never build: there is nothing to deduplicate, and the
/// result reports no consensus. Legs with any insertion or deletion take
/// the descriptor-checking path; all others take the alignment-only path.
///
/// `group_umi` is the duplicate group's representative UMI and `delimiter`
/// the identifier delimiter, both used to derive the consensus identifier.
///
/// # Errors
///
/// Fails only when the external reference lookup fails.
pub fn call_leg_consensus<R: ReferenceLookup>(
    reads: &[AlignedRead],
    group_umi: &str,
    delimiter: char,
    reference: &R,
) -> Result<LegConsensus> {
    if reads.len() < 2 {
        return Ok(LegConsensus::none(ConsensusOutcome::Unset));
    }

    let mut builder = ConsensusBuilder::for_leg(reads);
    if reads.iter().any(AlignedRead::has_indel) {
        indel::build_indel_aware(&mut builder, reads, reference)?;
    } else {
        aligned::build_alignment_only(&mut builder, reads, reference)?;
    }

    let outcome = builder.outcome;
    if !outcome.produced_consensus() {
        return Ok(LegConsensus::none(outcome));
    }

    let read = synthesize_read(builder, reads, group_umi, delimiter);
    Ok(LegConsensus { outcome, read: Some(read) })
}

/// Builds the consensus [`AlignedRead`] from finished build state.
///
/// Metadata comes from the representative (first) read of the leg: contig,
/// strand, pairing fields and the supplementary-alignment attribute. The
/// duplicate flag is always cleared on the consensus.
fn synthesize_read(
    builder: ConsensusBuilder,
    reads: &[AlignedRead],
    group_umi: &str,
    delimiter: char,
) -> AlignedRead {
    let rep = &reads[0];
    let outcome = builder.outcome;

    let name = consensus_name(rep.name.as_deref(), group_umi, delimiter);
    let total = reads.len() as i64;
    let first_of_pair = reads.iter().filter(|r| r.first_of_pair).count() as i64;

    let mut attrs = ahash::AHashMap::new();
    attrs.insert(CONSENSUS_TOTAL_TAG, AttrValue::Int(total));
    attrs.insert(CONSENSUS_FIRST_OF_PAIR_TAG, AttrValue::Int(first_of_pair));
    attrs.insert(CONSENSUS_TYPE_TAG, AttrValue::String(outcome.as_str().to_string()));
    if let Some(sa) = rep.string_attr(SUPPLEMENTARY_ALIGNMENT_TAG) {
        attrs.insert(SUPPLEMENTARY_ALIGNMENT_TAG, AttrValue::String(sa.to_string()));
    }

    AlignedRead {
        name: Some(name),
        contig: rep.contig.clone(),
        start: builder.start,
        cigar: builder.cigar,
        bases: builder.bases,
        quals: builder.quals,
        reverse: builder.reverse,
        paired: rep.paired,
        first_of_pair: rep.first_of_pair,
        mate_contig: rep.mate_contig.clone(),
        mate_start: rep.mate_start,
        insert_size: rep.insert_size,
        supplementary: rep.supplementary,
        duplicate: false,
        attrs,
    }
}

/// Derives the consensus identifier: the representative identifier with its
/// final delimiter-separated token replaced by `CNS_<groupUmi>`.
fn consensus_name(rep_name: Option<&str>, group_umi: &str, delimiter: char) -> String {
    match rep_name.and_then(|n| n.rsplit_once(delimiter)) {
        Some((prefix, _)) => format!("{prefix}{delimiter}{CONSENSUS_NAME_PREFIX}{group_umi}"),
        None => format!("{CONSENSUS_NAME_PREFIX}{group_umi}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::AlignedReadBuilder;
    use crate::reference::NoReference;

    fn leg_read(name: &str, bases: &[u8], qual: u8) -> AlignedRead {
        AlignedReadBuilder::new()
            .name(name)
            .start(100)
            .sequence(bases, qual)
            .paired(true)
            .mate("chr1", 400)
            .insert_size(350)
            .duplicate(true)
            .build()
    }

    #[test]
    fn test_single_read_leg_reports_no_consensus() {
        let reads = vec![leg_read("run:1:AAAA", b"ACGT", 30)];
        let result = call_leg_consensus(&reads, "AAAA", ':', &NoReference).unwrap();
        assert_eq!(result.outcome, ConsensusOutcome::Unset);
        assert!(result.read.is_none());
    }

    #[test]
    fn test_consensus_metadata_synthesis() {
        let reads =
            vec![leg_read("run:1:AAAA", b"ACGT", 30), leg_read("run:2:AAAT", b"ACGT", 20)];
        let result = call_leg_consensus(&reads, "AAAA", ':', &NoReference).unwrap();
        assert_eq!(result.outcome, ConsensusOutcome::AlignmentOnly);

        let read = result.read.unwrap();
        assert_eq!(read.name.as_deref(), Some("run:1:CNS_AAAA"));
        assert_eq!(read.int_attr(CONSENSUS_TOTAL_TAG), Some(2));
        assert_eq!(read.int_attr(CONSENSUS_FIRST_OF_PAIR_TAG), Some(2));
        assert_eq!(read.string_attr(CONSENSUS_TYPE_TAG), Some("ALIGNMENT_ONLY"));
        assert!(!read.duplicate, "duplicate flag must be cleared");
        assert!(read.paired);
        assert_eq!(read.mate_start, Some(400));
    }

    #[test]
    fn test_supplementary_alignment_attr_carried_from_representative() {
        let mut first = leg_read("a:1:TTTT", b"ACGT", 30);
        first
            .attrs
            .insert(SUPPLEMENTARY_ALIGNMENT_TAG, AttrValue::String("chr2,500,+,4M,60,0;".into()));
        let reads = vec![first, leg_read("a:2:TTTT", b"ACGT", 30)];
        let result = call_leg_consensus(&reads, "TTTT", ':', &NoReference).unwrap();
        assert_eq!(
            result.read.unwrap().string_attr(SUPPLEMENTARY_ALIGNMENT_TAG),
            Some("chr2,500,+,4M,60,0;")
        );
    }

    #[test]
    fn test_consensus_name_without_delimiter_or_name() {
        assert_eq!(consensus_name(Some("nodelim"), "ACGT", ':'), "CNS_ACGT");
        assert_eq!(consensus_name(None, "ACGT", ':'), "CNS_ACGT");
        assert_eq!(consensus_name(Some("a:b:OLD"), "ACGT", ':'), "a:b:CNS_ACGT");
    }
}

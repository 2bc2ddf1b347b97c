//! Indel-aware consensus building.
//!
//! A leg where any read carries an insertion or deletion cannot vote
//! position-by-position until the reads are shown to share one internal
//! alignment structure. Each read's descriptor is normalized into
//! (read offset, genomic position, operation, length) segments with the
//! clipped edges folded into the terminal match segments, neutralizing
//! clip-length differences. Reads whose internal segments line up exactly
//! are collapsed by the alignment-only voting loop and the consensus
//! descriptor is rebuilt from the group's aggregated boundaries; reads
//! whose internal segments differ degrade the leg to `IndelMismatch`.
//!
//! The original system also carried an experimental per-element
//! reconciliation for mismatched descriptors; it is intentionally not part
//! of this implementation, which follows the match-or-fail policy.

use crate::consensus::{aligned, ConsensusBuilder, ConsensusOutcome};
use crate::errors::Result;
use crate::read::{AlignedRead, Cigar, CigarOp};
use crate::reference::ReferenceLookup;

/// One normalized descriptor segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CigarSegment {
    /// Offset of the segment's first base within the read (query space).
    pub read_offset: usize,
    /// 1-based genomic position of the segment's first reference base; for
    /// insertions, the position of the next reference base.
    pub genomic_start: u64,
    /// The segment's operation after edge folding.
    pub op: CigarOp,
    /// Segment length.
    pub len: usize,
}

impl CigarSegment {
    /// 1-based genomic position of the last reference base covered, or
    /// `genomic_start - 1` for operations that consume no reference.
    fn genomic_end(&self) -> u64 {
        if self.op.consumes_reference() {
            self.genomic_start + self.len as u64 - 1
        } else {
            self.genomic_start.saturating_sub(1)
        }
    }
}

/// Normalizes a read's descriptor into segments, folding the leading
/// soft-clip into the first match segment and the trailing match/clip pair
/// into one terminal segment. Hard clips and pads consume nothing and are
/// dropped.
pub(crate) fn normalize_segments(read: &AlignedRead) -> Vec<CigarSegment> {
    let mut segments: Vec<CigarSegment> = Vec::with_capacity(read.cigar.len());
    let mut read_offset = 0usize;
    let mut genomic = read.start;

    for &(op, len) in &read.cigar {
        match op {
            CigarOp::HardClip | CigarOp::Pad => continue,
            _ => {
                segments.push(CigarSegment { read_offset, genomic_start: genomic, op, len });
                if op.consumes_query() {
                    read_offset += len;
                }
                if op.consumes_reference() {
                    genomic += len as u64;
                }
            }
        }
    }

    // Leading soft-clip folds into the first match segment, anchored at the
    // unclipped start.
    if segments.len() >= 2
        && segments[0].op == CigarOp::SoftClip
        && segments[1].op == CigarOp::Match
    {
        let clip = segments[0];
        let first = segments[1];
        segments[1] = CigarSegment {
            read_offset: 0,
            genomic_start: first.genomic_start - clip.len as u64,
            op: CigarOp::Match,
            len: clip.len + first.len,
        };
        segments.remove(0);
    }

    // Trailing match/clip pair folds into one terminal segment.
    if segments.len() >= 2
        && segments[segments.len() - 1].op == CigarOp::SoftClip
        && segments[segments.len() - 2].op == CigarOp::Match
    {
        let clip = segments.pop().expect("length checked above");
        let last = segments.last_mut().expect("length checked above");
        last.len += clip.len;
    }

    segments
}

/// True when every internal (non-terminal) segment is identical in
/// operation, genomic start and length across all reads, and the segment
/// counts agree. Terminal segment lengths are free to differ.
pub(crate) fn segments_consistent(all: &[Vec<CigarSegment>]) -> bool {
    let Some(first) = all.first() else { return true };
    let count = first.len();
    if all.iter().any(|segs| segs.len() != count) {
        return false;
    }
    if count < 3 {
        // No internal segments; consistent by construction.
        return true;
    }

    let internal = &first[1..count - 1];
    all.iter().skip(1).all(|segs| {
        segs[1..count - 1].iter().zip(internal).all(|(a, b)| {
            a.op == b.op && a.genomic_start == b.genomic_start && a.len == b.len
        })
    })
}

/// Rebuilds the consensus descriptor from the representative's internal
/// segments plus the group's aggregated boundaries.
///
/// Returns `None` on a contradiction: non-match terminal segments, an
/// internal segment outside the aggregated span, or a rebuilt descriptor
/// whose query length disagrees with the consensus length.
fn reconstruct_cigar(builder: &ConsensusBuilder, representative: &[CigarSegment]) -> Option<(Cigar, u64)> {
    let count = representative.len();
    if count < 3 {
        return None;
    }
    if representative[0].op != CigarOp::Match || representative[count - 1].op != CigarOp::Match {
        return None;
    }
    let internal = &representative[1..count - 1];

    let lead_clip = (builder.min_aligned_start - builder.min_unclipped_start) as usize;
    let trail_clip = (builder.max_unclipped_end - builder.max_aligned_end) as usize;

    let first_internal = internal.first().expect("count >= 3");
    let last_internal = internal.last().expect("count >= 3");
    if first_internal.genomic_start <= builder.min_aligned_start
        || last_internal.genomic_end() >= builder.max_aligned_end
    {
        return None;
    }
    let lead_match = (first_internal.genomic_start - builder.min_aligned_start) as usize;
    let trail_match = (builder.max_aligned_end - last_internal.genomic_end()) as usize;

    let mut cigar = Cigar::new();
    if lead_clip > 0 {
        cigar.push((CigarOp::SoftClip, lead_clip));
    }
    cigar.push((CigarOp::Match, lead_match));
    for segment in internal {
        cigar.push((segment.op, segment.len));
    }
    cigar.push((CigarOp::Match, trail_match));
    if trail_clip > 0 {
        cigar.push((CigarOp::SoftClip, trail_clip));
    }

    let query_len: usize =
        cigar.iter().filter(|(op, _)| op.consumes_query()).map(|&(_, len)| len).sum();
    if query_len != builder.bases.len() {
        return None;
    }

    Some((cigar, builder.min_aligned_start))
}

/// Builds a consensus for a leg containing insertions or deletions.
///
/// Consistent internal structure votes over full-length reads with no
/// offset correction and rebuilds the descriptor from the aggregated
/// boundaries (`IndelMatch`); differing structure produces no consensus
/// (`IndelMismatch`); a reconstruction contradiction produces no consensus
/// (`IndelFail`).
///
/// # Errors
///
/// Fails only when the external reference lookup fails.
pub fn build_indel_aware<R: ReferenceLookup>(
    builder: &mut ConsensusBuilder,
    reads: &[AlignedRead],
    reference: &R,
) -> Result<()> {
    let segments: Vec<Vec<CigarSegment>> = reads.iter().map(normalize_segments).collect();

    if !segments_consistent(&segments) {
        builder.outcome = ConsensusOutcome::IndelMismatch;
        return Ok(());
    }

    aligned::vote_positions(builder, reads, reference)?;

    // The representative for descriptor reconstruction is the first read in
    // leg order; only its internal segments survive, the flanks come from
    // the aggregated span.
    match reconstruct_cigar(builder, &segments[0]) {
        Some((cigar, start)) => {
            builder.cigar = cigar;
            builder.start = start;
            builder.outcome = ConsensusOutcome::IndelMatch;
        }
        None => {
            builder.bases.clear();
            builder.quals.clear();
            builder.outcome = ConsensusOutcome::IndelFail;
        }
    }
    Ok(())
}

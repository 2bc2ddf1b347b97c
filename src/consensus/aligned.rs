//! Alignment-only consensus building: per-base voting over a leg whose
//! reads contain no insertions or deletions.
//!
//! Reads in a leg share a biologically fixed anchor: forward legs line up
//! on their 5' unclipped start, reverse legs on their 3' unclipped end.
//! Shorter reads simply stop contributing past their own length; absent
//! data at a position is excluded, never an error.

use crate::consensus::{ConsensusBuilder, ConsensusOutcome};
use crate::errors::Result;
use crate::read::{AlignedRead, CigarOp};
use crate::reference::ReferenceLookup;

/// Per-symbol vote bucket.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    base: u8,
    sum: u32,
    max: u8,
}

/// Accumulates (base, quality) observations for a single position and
/// calls the winning base.
///
/// Buckets are kept in first-observation order, which fixes the documented
/// order-dependent tie-break: when two symbols tie on summed quality and
/// the reference matches neither, the symbol seen first in read iteration
/// order wins.
#[derive(Debug, Default)]
pub(crate) struct BaseVote {
    buckets: Vec<Bucket>,
}

impl BaseVote {
    /// Clears the accumulator for the next position.
    pub(crate) fn reset(&mut self) {
        self.buckets.clear();
    }

    /// Adds one observation.
    pub(crate) fn add(&mut self, base: u8, qual: u8) {
        for bucket in &mut self.buckets {
            if bucket.base == base {
                bucket.sum += u32::from(qual);
                bucket.max = bucket.max.max(qual);
                return;
            }
        }
        self.buckets.push(Bucket { base, sum: u32::from(qual), max: qual });
    }

    /// True when no observation was added.
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// True when the top summed quality is shared by more than one symbol,
    /// so the call would consult the reference.
    pub(crate) fn has_sum_tie(&self) -> bool {
        if self.buckets.len() < 2 {
            return false;
        }
        let best = self.buckets.iter().map(|b| b.sum).max().unwrap_or(0);
        self.buckets.iter().filter(|b| b.sum == best).count() > 1
    }

    /// Calls the consensus (base, quality) for this position.
    ///
    /// Agreement keeps the strongest single observation. Disagreement picks
    /// the symbol with the greatest summed quality — `ref_base` breaks exact
    /// sum ties — and discounts the winner's best quality by the volume of
    /// competing evidence:
    /// `round(best_max * max(0, best_sum - other_sum) / best_sum)`.
    pub(crate) fn call(&self, ref_base: Option<u8>) -> (u8, u8) {
        match self.buckets.len() {
            0 => (b'N', 0),
            1 => (self.buckets[0].base, self.buckets[0].max),
            _ => {
                let best_sum = self.buckets.iter().map(|b| b.sum).max().unwrap_or(0);
                let winner = self
                    .buckets
                    .iter()
                    .filter(|b| b.sum == best_sum)
                    .find(|b| ref_base == Some(b.base))
                    .or_else(|| self.buckets.iter().find(|b| b.sum == best_sum))
                    .copied()
                    .unwrap_or(Bucket { base: b'N', sum: 0, max: 0 });

                let total: u32 = self.buckets.iter().map(|b| b.sum).sum();
                let other = total - winner.sum;
                let qual = if winner.sum == 0 || other >= winner.sum {
                    0
                } else {
                    let discounted = f64::from(winner.max)
                        * f64::from(winner.sum - other)
                        / f64::from(winner.sum);
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        discounted.round() as u8
                    }
                };
                (winner.base, qual)
            }
        }
    }
}

/// The read index contributing to output position `i`, if any.
///
/// Forward reads contribute index `i` directly; reverse reads are anchored
/// on their 3' end, shifting by `read_len - working_len`.
fn contributing_index(i: usize, read_len: usize, working_len: usize, reverse: bool) -> Option<usize> {
    if reverse {
        let shifted = i as isize + read_len as isize - working_len as isize;
        (shifted >= 0).then_some(shifted as usize)
    } else {
        (i < read_len).then_some(i)
    }
}

/// Fills the builder's base and quality buffers by voting across `reads`
/// at every position of the working window.
///
/// Shared by the alignment-only and indel-aware paths: when internal
/// descriptor structure matches, full-length reads vote without offset
/// correction.
pub(crate) fn vote_positions<R: ReferenceLookup>(
    builder: &mut ConsensusBuilder,
    reads: &[AlignedRead],
    reference: &R,
) -> Result<()> {
    let contig = &reads[0].contig;
    let mut vote = BaseVote::default();

    for i in 0..builder.working_len {
        vote.reset();
        for read in reads {
            if let Some(idx) = contributing_index(i, read.len(), builder.working_len, builder.reverse)
            {
                vote.add(read.bases[idx], read.quals[idx]);
            }
        }

        // The reference is consulted only when a sum tie needs breaking.
        let ref_base = if vote.has_sum_tie() {
            Some(reference.base(contig, builder.ref_pos(i))?.to_ascii_uppercase())
        } else {
            None
        };

        debug_assert!(!vote.is_empty(), "the longest read contributes at every position");
        let (base, qual) = vote.call(ref_base);
        builder.bases.push(base);
        builder.quals.push(qual);
    }

    Ok(())
}

/// Builds an alignment-only consensus for a leg with no insertions or
/// deletions, filling bases, qualities and a clip/match/clip descriptor.
///
/// # Errors
///
/// Fails only when the external reference lookup fails.
pub fn build_alignment_only<R: ReferenceLookup>(
    builder: &mut ConsensusBuilder,
    reads: &[AlignedRead],
    reference: &R,
) -> Result<()> {
    vote_positions(builder, reads, reference)?;

    if builder.working_len == 0 {
        builder.outcome = ConsensusOutcome::AlignmentOnly;
        return Ok(());
    }

    let window_start = builder.window_start();
    let window_end = window_start + builder.working_len as u64 - 1;

    let lead_clip = (builder.min_aligned_start.saturating_sub(window_start) as usize)
        .min(builder.working_len);
    let trail_clip = (window_end.saturating_sub(builder.max_aligned_end) as usize)
        .min(builder.working_len - lead_clip);
    let matched = builder.working_len - lead_clip - trail_clip;

    if lead_clip > 0 {
        builder.cigar.push((CigarOp::SoftClip, lead_clip));
    }
    if matched > 0 {
        builder.cigar.push((CigarOp::Match, matched));
    }
    if trail_clip > 0 {
        builder.cigar.push((CigarOp::SoftClip, trail_clip));
    }

    builder.start = window_start + lead_clip as u64;
    builder.outcome = ConsensusOutcome::AlignmentOnly;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{cigar_to_string, AlignedReadBuilder};
    use crate::reference::{InMemoryReference, NoReference};

    fn forward_read(bases: &[u8], quals: &[u8], start: u64) -> AlignedRead {
        AlignedReadBuilder::new().start(start).sequence(bases, 0).quals(quals).build()
    }

    fn build(reads: &[AlignedRead]) -> ConsensusBuilder {
        let mut builder = ConsensusBuilder::for_leg(reads);
        build_alignment_only(&mut builder, reads, &NoReference).unwrap();
        builder
    }

    #[test]
    fn test_identity_leg_keeps_sequence_and_max_quality() {
        let reads: Vec<AlignedRead> = (0..3)
            .map(|_| forward_read(b"ACGTACGT", &[20, 21, 22, 23, 24, 25, 26, 27], 100))
            .collect();
        let builder = build(&reads);
        assert_eq!(builder.bases, b"ACGTACGT");
        assert_eq!(builder.quals, vec![20, 21, 22, 23, 24, 25, 26, 27]);
        assert_eq!(builder.outcome, ConsensusOutcome::AlignmentOnly);
        assert_eq!(cigar_to_string(&builder.cigar), "8M");
        assert_eq!(builder.start, 100);
    }

    #[test]
    fn test_agreement_takes_maximum_quality() {
        let reads =
            vec![forward_read(b"AAAA", &[10, 10, 10, 10], 50), forward_read(b"AAAA", &[30, 5, 30, 5], 50)];
        let builder = build(&reads);
        assert_eq!(builder.quals, vec![30, 10, 30, 10]);
    }

    #[test]
    fn test_quality_discount_law() {
        // qa=30 (A) vs qb=10 (B): A wins, quality round(30 * 20/30) = 20.
        let reads = vec![forward_read(b"A", &[30], 10), forward_read(b"C", &[10], 10)];
        let builder = build(&reads);
        assert_eq!(builder.bases, b"A");
        assert_eq!(builder.quals, vec![20]);
    }

    #[test]
    fn test_majority_by_summed_quality_not_count() {
        // Two C@10 sum to 20; one A@30 outweighs them.
        let reads = vec![
            forward_read(b"C", &[10], 10),
            forward_read(b"C", &[10], 10),
            forward_read(b"A", &[30], 10),
        ];
        let builder = build(&reads);
        assert_eq!(builder.bases, b"A");
        // round(30 * (30 - 20) / 30) = 10
        assert_eq!(builder.quals, vec![10]);
    }

    #[test]
    fn test_reference_breaks_sum_tie() {
        let mut reference = InMemoryReference::new();
        reference.add_contig("chr1", b"CCCCCCCCCC");

        let reads = vec![forward_read(b"A", &[20], 5), forward_read(b"C", &[20], 5)];
        let mut builder = ConsensusBuilder::for_leg(&reads);
        build_alignment_only(&mut builder, &reads, &reference).unwrap();
        assert_eq!(builder.bases, b"C");
        // Fully contested: round(20 * 0/20) = 0.
        assert_eq!(builder.quals, vec![0]);
    }

    #[test]
    fn test_sum_tie_without_reference_keeps_first_seen_symbol() {
        let reads = vec![forward_read(b"G", &[20], 5), forward_read(b"A", &[20], 5)];
        let builder = build(&reads);
        assert_eq!(builder.bases, b"G");
    }

    #[test]
    fn test_shorter_forward_read_stops_contributing() {
        let reads = vec![
            forward_read(b"AAAA", &[10, 10, 10, 10], 100),
            forward_read(b"CC", &[30, 30], 100),
        ];
        let builder = build(&reads);
        // Positions 0-1 contested (C wins on sum), 2-3 only the long read.
        assert_eq!(builder.bases, b"CCAA");
        assert_eq!(builder.quals, vec![20, 20, 10, 10]);
    }

    #[test]
    fn test_reverse_leg_anchors_on_three_prime_end() {
        // Reverse legs line up on their right edge: the short read's bases
        // land on the last output positions.
        let long = AlignedReadBuilder::new()
            .start(100)
            .sequence(b"AAAA", 10)
            .reverse(true)
            .build();
        let short = AlignedReadBuilder::new()
            .start(102)
            .sequence(b"CC", 30)
            .reverse(true)
            .build();
        let reads = vec![long, short];
        let builder = build(&reads);
        assert_eq!(builder.bases, b"AACC");
        assert_eq!(builder.quals, vec![10, 10, 20, 20]);
    }

    #[test]
    fn test_clips_derived_from_aggregated_boundaries() {
        // Both reads carry a 2-base leading soft clip; the window spans the
        // unclipped start, so the consensus keeps the clip.
        let reads = vec![
            AlignedReadBuilder::new().start(100).sequence(b"TTACGT", 20).cigar("2S4M").build(),
            AlignedReadBuilder::new().start(100).sequence(b"TTACGT", 25).cigar("2S4M").build(),
        ];
        let builder = build(&reads);
        assert_eq!(cigar_to_string(&builder.cigar), "2S4M");
        assert_eq!(builder.start, 100);
        assert_eq!(builder.quals, vec![25; 6]);
    }

    #[test]
    fn test_contributing_index_mapping() {
        assert_eq!(contributing_index(0, 4, 6, false), Some(0));
        assert_eq!(contributing_index(4, 4, 6, false), None);
        assert_eq!(contributing_index(0, 4, 6, true), None);
        assert_eq!(contributing_index(2, 4, 6, true), Some(0));
        assert_eq!(contributing_index(5, 4, 6, true), Some(3));
    }
}

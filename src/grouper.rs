//! Duplicate-group management: UMI bucketing, leg classification,
//! completion tracking and consensus emission.
//!
//! Raw reads for one genomic duplicate-position group flow in; they are
//! bucketed by UMI (exact, then fuzzy-merged), classified into legs, and
//! each leg is collapsed the moment it has accumulated the group's fragment
//! count. The originals and the consensus read flow out; the leg's buffer
//! is freed immediately, independently of its siblings.

use crate::config::UmiConfig;
use crate::consensus::{call_leg_consensus, ConsensusOutcome, LegConsensus};
use crate::errors::{DedupError, Result};
use crate::metrics::CollapseMetrics;
use crate::read::AlignedRead;
use crate::reference::ReferenceLookup;
use crate::umi::{cluster_umis, correct_to_defined, extract_umi, UmiId};

/// One of the four physical read roles within a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Primary alignment of the first segment (or of an unpaired read).
    Primary,
    /// Primary alignment of the mate segment.
    Mate,
    /// Supplementary alignment of the first segment.
    PrimarySupplementary,
    /// Supplementary alignment of the mate segment.
    MateSupplementary,
}

impl Leg {
    /// All legs, in emission order.
    pub const ALL: [Leg; 4] =
        [Leg::Primary, Leg::Mate, Leg::PrimarySupplementary, Leg::MateSupplementary];

    /// Classifies a read from its pairing and supplementary bits. Unpaired
    /// reads classify as [`Leg::Primary`].
    #[must_use]
    pub fn classify(read: &AlignedRead) -> Leg {
        let mate_side = read.paired && !read.first_of_pair;
        match (read.supplementary, mate_side) {
            (false, false) => Leg::Primary,
            (false, true) => Leg::Mate,
            (true, false) => Leg::PrimarySupplementary,
            (true, true) => Leg::MateSupplementary,
        }
    }

    fn index(self) -> usize {
        match self {
            Leg::Primary => 0,
            Leg::Mate => 1,
            Leg::PrimarySupplementary => 2,
            Leg::MateSupplementary => 3,
        }
    }
}

/// Buffer and completion flag for one leg.
///
/// A leg that was never populated has no `LegState` at all, keeping
/// "exists but drained" distinguishable from "does not apply".
#[derive(Debug, Default)]
struct LegState {
    reads: Vec<AlignedRead>,
    complete: bool,
}

/// What one ready leg emitted: its original reads followed by the
/// consensus read, when the build produced one.
#[derive(Debug)]
pub struct LegEmission {
    /// Which leg emitted.
    pub leg: Leg,
    /// The build outcome ([`ConsensusOutcome::Unset`] for single-fragment
    /// legs, which never build).
    pub outcome: ConsensusOutcome,
    /// The leg's original reads, in arrival order.
    pub originals: Vec<AlignedRead>,
    /// The consensus read, if the outcome produced one.
    pub consensus: Option<AlignedRead>,
}

/// One duplicate group: a UMI cluster's reads, split into legs.
#[derive(Debug)]
pub struct DuplicateGroup {
    umi: UmiId,
    fragment_count: usize,
    legs: [Option<LegState>; 4],
}

impl DuplicateGroup {
    /// Creates a group for `umi` with its established fragment count.
    #[must_use]
    pub fn new(umi: UmiId, fragment_count: usize) -> Self {
        Self { umi, fragment_count: fragment_count.max(1), legs: Default::default() }
    }

    /// The group's representative UMI.
    #[must_use]
    pub fn umi(&self) -> &str {
        &self.umi
    }

    /// The group's fixed fragment count.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Classifies `read` into its leg and buffers it, creating the leg on
    /// first sight.
    ///
    /// # Errors
    ///
    /// Rejects reads for a leg that has already been built and emitted
    /// ([`DedupError::LegComplete`]) and reads that would grow a leg past
    /// the fragment count ([`DedupError::LegOverflow`]); both are defended
    /// invariant violations.
    pub fn push(&mut self, read: AlignedRead) -> Result<()> {
        let leg = Leg::classify(&read);
        let state = self.legs[leg.index()].get_or_insert_with(LegState::default);
        if state.complete {
            return Err(DedupError::LegComplete { leg });
        }
        if state.reads.len() >= self.fragment_count {
            return Err(DedupError::LegOverflow { leg, fragment_count: self.fragment_count });
        }
        state.reads.push(read);
        Ok(())
    }

    /// Number of reads currently buffered for `leg`, if the leg exists.
    #[must_use]
    pub fn leg_len(&self, leg: Leg) -> Option<usize> {
        self.legs[leg.index()].as_ref().map(|state| state.reads.len())
    }

    /// True once `leg` has been built and emitted.
    #[must_use]
    pub fn leg_complete(&self, leg: Leg) -> bool {
        self.legs[leg.index()].as_ref().is_some_and(|state| state.complete)
    }

    /// Builds and drains every newly-ready leg (buffer length equal to the
    /// fragment count), independently of sibling legs.
    ///
    /// Single-fragment groups never build: the leg is drained and marked
    /// complete with no consensus.
    ///
    /// # Errors
    ///
    /// Fails only when the external reference lookup fails.
    pub fn build_ready<R: ReferenceLookup>(
        &mut self,
        delimiter: char,
        reference: &R,
    ) -> Result<Vec<LegEmission>> {
        let mut emissions = Vec::new();

        for leg in Leg::ALL {
            let Some(state) = self.legs[leg.index()].as_mut() else { continue };
            if state.complete || state.reads.len() != self.fragment_count {
                continue;
            }

            let originals = std::mem::take(&mut state.reads);
            state.complete = true;

            let LegConsensus { outcome, read } = if self.fragment_count == 1 {
                LegConsensus { outcome: ConsensusOutcome::Unset, read: None }
            } else {
                call_leg_consensus(&originals, &self.umi, delimiter, reference)?
            };

            log::debug!(
                "built {:?} leg of UMI group {} ({} reads): {}",
                leg,
                self.umi,
                originals.len(),
                outcome.as_str()
            );
            emissions.push(LegEmission { leg, outcome, originals, consensus: read });
        }

        Ok(emissions)
    }

    /// Drains every leg that never reached the fragment count, returning
    /// the orphaned originals. Called at the end of a position group.
    pub fn flush_incomplete(&mut self) -> Vec<(Leg, Vec<AlignedRead>)> {
        let mut flushed = Vec::new();
        for leg in Leg::ALL {
            let Some(state) = self.legs[leg.index()].as_mut() else { continue };
            if !state.complete && !state.reads.is_empty() {
                flushed.push((leg, std::mem::take(&mut state.reads)));
            }
        }
        flushed
    }
}

/// UMI-aware duplicate-group manager.
///
/// Owns the run-level UMI state: the fixed UMI length derived from the
/// first read seen, the defined-UMI mode flag, and the run metrics. One
/// grouper processes many position groups sequentially; an external
/// orchestrator may run several groupers concurrently as long as it never
/// splits a position group across them.
pub struct UmiGrouper<R: ReferenceLookup> {
    config: UmiConfig,
    reference: R,
    /// Fixed UMI length, derived once from the first read of the run.
    umi_len: Option<usize>,
    /// Set once any read fails defined-UMI correction; the whole run then
    /// falls back to free clustering.
    defined_abandoned: bool,
    metrics: CollapseMetrics,
}

impl<R: ReferenceLookup> UmiGrouper<R> {
    /// Creates a grouper over the given configuration and reference.
    #[must_use]
    pub fn new(config: UmiConfig, reference: R) -> Self {
        Self { config, reference, umi_len: None, defined_abandoned: false, metrics: CollapseMetrics::default() }
    }

    /// The run metrics accumulated so far.
    #[must_use]
    pub fn metrics(&self) -> &CollapseMetrics {
        &self.metrics
    }

    /// Consumes the grouper, returning its metrics.
    #[must_use]
    pub fn into_metrics(self) -> CollapseMetrics {
        self.metrics
    }

    /// Collapses one duplicate-position group.
    ///
    /// Returns the emitted reads: every original, plus one consensus read
    /// per collapsed leg. With UMI handling disabled the group passes
    /// through untouched.
    ///
    /// # Errors
    ///
    /// Fails on malformed reads, identifiers unusable for UMI extraction,
    /// defended leg invariant violations, and reference-lookup failures.
    pub fn process_position_group(&mut self, reads: Vec<AlignedRead>) -> Result<Vec<AlignedRead>> {
        self.metrics.position_groups += 1;
        self.metrics.total_reads += reads.len() as u64;

        if !self.config.enabled || reads.is_empty() {
            return Ok(reads);
        }
        for read in &reads {
            read.validate()?;
        }

        let umis = self.extract_umis(&reads)?;
        let umis = self.correct_umis(umis);

        // Defined mode already canonicalized the UMIs, so clusters form on
        // exact identity; free clustering merges within the edit budget.
        let max_distance =
            if self.defined_mode_active() { 0 } else { self.config.max_edit_distance };
        let clusters = cluster_umis(&umis, max_distance);

        let mut slots: Vec<Option<AlignedRead>> = reads.into_iter().map(Some).collect();
        let mut output = Vec::with_capacity(slots.len());

        for cluster in clusters {
            self.metrics.umi_clusters += 1;

            let cluster_reads: Vec<AlignedRead> = cluster
                .read_indices
                .iter()
                .map(|&idx| slots[idx].take().expect("cluster indices are disjoint"))
                .collect();

            let fragment_count = established_fragment_count(&cluster_reads);
            if fragment_count == 1 {
                self.metrics.single_fragment_clusters += 1;
            }

            let mut group = DuplicateGroup::new(cluster.umi, fragment_count);
            for read in cluster_reads {
                group.push(read)?;
                for emission in group.build_ready(self.config.delimiter, &self.reference)? {
                    self.metrics.record_outcome(emission.outcome);
                    output.extend(emission.originals);
                    output.extend(emission.consensus);
                }
            }

            for (leg, orphans) in group.flush_incomplete() {
                log::debug!(
                    "flushing {} reads from incomplete {:?} leg of UMI group {}",
                    orphans.len(),
                    leg,
                    group.umi()
                );
                self.metrics.incomplete_legs += 1;
                output.extend(orphans);
            }
        }

        Ok(output)
    }

    fn defined_mode_active(&self) -> bool {
        self.config.defined_umis.is_some() && !self.defined_abandoned
    }

    /// Extracts one UMI per read, establishing the run's fixed UMI length
    /// from the first read if not yet known.
    fn extract_umis(&mut self, reads: &[AlignedRead]) -> Result<Vec<UmiId>> {
        let umi_len = match self.umi_len {
            Some(len) => len,
            None => {
                let first = &reads[0];
                let name = first.name.as_deref().ok_or(DedupError::MissingIdentifier)?;
                let umi = extract_umi(name, self.config.delimiter).ok_or_else(|| {
                    DedupError::MalformedRead {
                        name: name.to_string(),
                        reason: format!(
                            "no UMI token after delimiter '{}'",
                            self.config.delimiter
                        ),
                    }
                })?;
                let len = umi.len();
                log::debug!("established UMI length {len} from read '{name}'");
                self.umi_len = Some(len);
                len
            }
        };

        reads
            .iter()
            .map(|read| {
                let name = read.name.as_deref().ok_or(DedupError::MissingIdentifier)?;
                if name.len() < umi_len {
                    return Err(DedupError::IdentifierTooShort {
                        name: name.to_string(),
                        umi_len,
                    });
                }
                // Fixed-length suffix slice; identifiers are ASCII read
                // names, so the boundary check only fails on malformed input.
                name.get(name.len() - umi_len..)
                    .map(ToString::to_string)
                    .ok_or_else(|| DedupError::IdentifierTooShort {
                        name: name.to_string(),
                        umi_len,
                    })
            })
            .collect()
    }

    /// Applies defined-UMI correction when configured and not abandoned.
    ///
    /// All-or-nothing: the first read in the run that matches nothing in
    /// the defined set abandons defined mode for the entire run.
    fn correct_umis(&mut self, umis: Vec<UmiId>) -> Vec<UmiId> {
        if !self.defined_mode_active() {
            return umis;
        }
        let defined = self.config.defined_umis.as_deref().unwrap_or_default();

        let mut corrected = Vec::with_capacity(umis.len());
        let mut corrections = 0u64;
        for umi in &umis {
            match correct_to_defined(umi, defined, self.config.max_edit_distance) {
                Some(matched) => {
                    if matched != umi {
                        corrections += 1;
                    }
                    corrected.push(matched.to_string());
                }
                None => {
                    log::warn!(
                        "UMI '{umi}' matches no defined UMI within {} edits; \
                         abandoning defined-UMI mode for this run",
                        self.config.max_edit_distance
                    );
                    self.defined_abandoned = true;
                    return umis;
                }
            }
        }

        self.metrics.corrected_umis += corrections;
        corrected
    }
}

/// Establishes a cluster's fragment count from its classified reads: the
/// primary count, else the mate count, else the largest supplementary
/// count, floored at one.
fn established_fragment_count(reads: &[AlignedRead]) -> usize {
    let mut counts = [0usize; 4];
    for read in reads {
        counts[Leg::classify(read).index()] += 1;
    }
    let [primary, mate, primary_sup, mate_sup] = counts;
    if primary > 0 {
        primary
    } else if mate > 0 {
        mate
    } else {
        primary_sup.max(mate_sup).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{AlignedRead, AlignedReadBuilder};
    use crate::reference::NoReference;

    fn read(name: &str, first_of_pair: bool, supplementary: bool) -> AlignedRead {
        AlignedReadBuilder::new()
            .name(name)
            .start(100)
            .sequence(b"ACGTACGT", 30)
            .paired(first_of_pair)
            .supplementary(supplementary)
            .build()
    }

    fn grouper() -> UmiGrouper<NoReference> {
        UmiGrouper::new(UmiConfig::default(), NoReference)
    }

    #[test]
    fn test_leg_classification() {
        assert_eq!(Leg::classify(&read("q:AAAA", true, false)), Leg::Primary);
        assert_eq!(Leg::classify(&read("q:AAAA", false, false)), Leg::Mate);
        assert_eq!(Leg::classify(&read("q:AAAA", true, true)), Leg::PrimarySupplementary);
        assert_eq!(Leg::classify(&read("q:AAAA", false, true)), Leg::MateSupplementary);

        let unpaired = AlignedReadBuilder::new()
            .name("q:AAAA")
            .sequence(b"ACGT", 30)
            .build();
        assert_eq!(Leg::classify(&unpaired), Leg::Primary);
    }

    #[test]
    fn test_completion_gating() {
        // fragment_count = 3: no consensus until exactly 3 reads land in a
        // leg, and emission drains that leg only.
        let mut group = DuplicateGroup::new("AAAA".to_string(), 3);

        group.push(read("q:1:AAAA", true, false)).unwrap();
        assert!(group.build_ready(':', &NoReference).unwrap().is_empty());
        group.push(read("q:2:AAAA", true, false)).unwrap();
        assert!(group.build_ready(':', &NoReference).unwrap().is_empty());
        group.push(read("q:3:AAAA", false, false)).unwrap();
        assert!(group.build_ready(':', &NoReference).unwrap().is_empty());

        group.push(read("q:4:AAAA", true, false)).unwrap();
        let emissions = group.build_ready(':', &NoReference).unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].leg, Leg::Primary);
        assert_eq!(emissions[0].originals.len(), 3);
        assert!(emissions[0].consensus.is_some());
        assert!(group.leg_complete(Leg::Primary));
        assert!(!group.leg_complete(Leg::Mate));
        assert_eq!(group.leg_len(Leg::Mate), Some(1));
    }

    #[test]
    fn test_push_after_completion_is_rejected() {
        let mut group = DuplicateGroup::new("AAAA".to_string(), 1);
        group.push(read("q:1:AAAA", true, false)).unwrap();
        let emissions = group.build_ready(':', &NoReference).unwrap();
        assert_eq!(emissions[0].outcome, ConsensusOutcome::Unset);
        assert!(emissions[0].consensus.is_none());

        let err = group.push(read("q:5:AAAA", true, false)).unwrap_err();
        assert!(matches!(err, DedupError::LegComplete { leg: Leg::Primary }));
    }

    #[test]
    fn test_single_fragment_short_circuit() {
        let mut grouper = grouper();
        let output = grouper
            .process_position_group(vec![
                read("q:1:AAAA", true, false),
                read("q:1:AAAA", false, false),
            ])
            .unwrap();
        // One fragment: both legs emit their original only, no consensus.
        assert_eq!(output.len(), 2);
        assert_eq!(grouper.metrics().consensus_reads, 0);
        assert_eq!(grouper.metrics().single_fragment_clusters, 1);
    }

    #[test]
    fn test_collapse_emits_originals_then_consensus() {
        let mut grouper = grouper();
        let output = grouper
            .process_position_group(vec![
                read("q:1:AAAA", true, false),
                read("q:2:AAAA", true, false),
            ])
            .unwrap();
        assert_eq!(output.len(), 3);
        assert_eq!(output[0].name.as_deref(), Some("q:1:AAAA"));
        assert_eq!(output[1].name.as_deref(), Some("q:2:AAAA"));
        assert_eq!(output[2].name.as_deref(), Some("q:1:CNS_AAAA"));
        assert_eq!(grouper.metrics().consensus_reads, 1);
        assert_eq!(grouper.metrics().alignment_only_legs, 1);
    }

    #[test]
    fn test_fuzzy_umis_collapse_into_one_cluster() {
        let mut grouper = grouper();
        let output = grouper
            .process_position_group(vec![
                read("q:1:GATTACA", true, false),
                read("q:2:GATTACA", true, false),
                read("q:3:GATTACT", true, false),
            ])
            .unwrap();
        // One cluster of three fragments: three originals plus a consensus
        // named for the seed UMI.
        assert_eq!(output.len(), 4);
        assert_eq!(output[3].name.as_deref(), Some("q:1:CNS_GATTACA"));
        assert_eq!(grouper.metrics().umi_clusters, 1);
    }

    #[test]
    fn test_incomplete_supplementary_leg_is_flushed() {
        let mut grouper = grouper();
        let output = grouper
            .process_position_group(vec![
                read("q:1:AAAA", true, false),
                read("q:2:AAAA", true, false),
                read("q:3:AAAA", true, true),
            ])
            .unwrap();
        // Two primaries collapse; the lone supplementary never reaches the
        // fragment count and is flushed as-is.
        assert_eq!(output.len(), 4);
        assert_eq!(grouper.metrics().incomplete_legs, 1);
        assert_eq!(grouper.metrics().consensus_reads, 1);
    }

    #[test]
    fn test_defined_mode_corrects_and_abandons() {
        let config = UmiConfig {
            defined_umis: Some(vec!["AAAA".to_string(), "CCCC".to_string()]),
            ..UmiConfig::default()
        };
        let mut grouper = UmiGrouper::new(config, NoReference);

        let output = grouper
            .process_position_group(vec![
                read("q:1:AAAA", true, false),
                read("q:2:AAAT", true, false),
            ])
            .unwrap();
        assert_eq!(output[2].name.as_deref(), Some("q:1:CNS_AAAA"));
        assert_eq!(grouper.metrics().corrected_umis, 1);

        // GGGG matches nothing: the whole run falls back to free clustering.
        let output = grouper
            .process_position_group(vec![
                read("q:1:GGGG", true, false),
                read("q:2:GGGG", true, false),
            ])
            .unwrap();
        assert!(grouper.defined_abandoned);
        assert_eq!(output[2].name.as_deref(), Some("q:1:CNS_GGGG"));
    }

    #[test]
    fn test_disabled_config_passes_reads_through() {
        let config = UmiConfig { enabled: false, ..UmiConfig::default() };
        let mut grouper = UmiGrouper::new(config, NoReference);
        let output = grouper
            .process_position_group(vec![read("q:1:AAAA", true, false)])
            .unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(grouper.metrics().umi_clusters, 0);
    }

    #[test]
    fn test_missing_identifier_is_an_error() {
        let mut grouper = grouper();
        let nameless = AlignedReadBuilder::new().sequence(b"ACGT", 30).build();
        let err = grouper.process_position_group(vec![nameless]).unwrap_err();
        assert!(matches!(err, DedupError::MissingIdentifier));
    }

    #[test]
    fn test_umi_length_fixed_by_first_read() {
        let mut grouper = grouper();
        grouper
            .process_position_group(vec![
                read("q:1:AAAA", true, false),
                read("q:2:AAAA", true, false),
            ])
            .unwrap();
        // Established length is 4; a shorter identifier cannot be sliced.
        let err = grouper
            .process_position_group(vec![read("abc", true, false), read("q:2:CCCC", true, false)])
            .unwrap_err();
        assert!(matches!(err, DedupError::IdentifierTooShort { umi_len: 4, .. }));
    }
}

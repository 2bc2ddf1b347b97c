//! Structured counters for downstream statistics and diagnostics.
//!
//! The grouper fills one [`CollapseMetrics`] per run; the embedding
//! application owns serialization (the types derive serde) and logger
//! installation.

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusOutcome;

/// Counters describing one collapsing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollapseMetrics {
    /// Reads handed to the grouper.
    pub total_reads: u64,
    /// Duplicate-position groups processed.
    pub position_groups: u64,
    /// UMI clusters formed across all position groups.
    pub umi_clusters: u64,
    /// Extracted UMIs corrected to a defined UMI (defined mode only).
    pub corrected_umis: u64,
    /// Clusters with a single fragment, which never build a consensus.
    pub single_fragment_clusters: u64,
    /// Consensus reads emitted.
    pub consensus_reads: u64,
    /// Legs collapsed by the alignment-only builder.
    pub alignment_only_legs: u64,
    /// Indel legs with consistent descriptors, collapsed and reconstructed.
    pub indel_match_legs: u64,
    /// Indel legs whose descriptors disagreed; originals kept unflagged.
    pub indel_mismatch_legs: u64,
    /// Indel legs lost to a reconstruction contradiction.
    pub indel_fail_legs: u64,
    /// Legs flushed without reaching their fragment count.
    pub incomplete_legs: u64,
}

impl CollapseMetrics {
    /// Records one leg build outcome.
    pub fn record_outcome(&mut self, outcome: ConsensusOutcome) {
        match outcome {
            ConsensusOutcome::Unset => {}
            ConsensusOutcome::AlignmentOnly => {
                self.alignment_only_legs += 1;
                self.consensus_reads += 1;
            }
            ConsensusOutcome::IndelMatch => {
                self.indel_match_legs += 1;
                self.consensus_reads += 1;
            }
            ConsensusOutcome::IndelMismatch => self.indel_mismatch_legs += 1,
            ConsensusOutcome::IndelFail => self.indel_fail_legs += 1,
        }
    }

    /// Folds another run's counters into this one.
    pub fn merge(&mut self, other: &CollapseMetrics) {
        self.total_reads += other.total_reads;
        self.position_groups += other.position_groups;
        self.umi_clusters += other.umi_clusters;
        self.corrected_umis += other.corrected_umis;
        self.single_fragment_clusters += other.single_fragment_clusters;
        self.consensus_reads += other.consensus_reads;
        self.alignment_only_legs += other.alignment_only_legs;
        self.indel_match_legs += other.indel_match_legs;
        self.indel_mismatch_legs += other.indel_mismatch_legs;
        self.indel_fail_legs += other.indel_fail_legs;
        self.incomplete_legs += other.incomplete_legs;
    }

    /// Logs a human-readable summary at info level.
    pub fn log_summary(&self) {
        log::info!("Collapse statistics:");
        log::info!("  Input reads: {}", self.total_reads);
        log::info!(
            "  Position groups: {} ({} UMI clusters)",
            self.position_groups,
            self.umi_clusters
        );
        log::info!("  Consensus reads: {}", self.consensus_reads);
        log::info!(
            "  Legs: {} alignment-only, {} indel-match, {} indel-mismatch, {} indel-fail",
            self.alignment_only_legs,
            self.indel_match_legs,
            self.indel_mismatch_legs,
            self.indel_fail_legs
        );
        if self.corrected_umis > 0 {
            log::info!("  Corrected UMIs: {}", self.corrected_umis);
        }
        if self.incomplete_legs > 0 {
            log::info!("  Incomplete legs flushed: {}", self.incomplete_legs);
        }
    }
}

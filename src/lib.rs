#![deny(unsafe_code)]

//! UMI-aware duplicate collapsing for aligned sequencing reads.
//!
//! Reads tagged with a Unique Molecular Identifier (UMI) before
//! amplification are grouped back to their source molecule and collapsed
//! into one error-corrected consensus read. This crate owns the hard middle
//! of that pipeline: fuzzy clustering over error-prone UMI tokens, leg
//! classification of paired and supplementary alignments, and the
//! reconciliation of variably clipped, variably indelled alignments into a
//! single base/quality array.
//!
//! The crate is a pure, synchronous transformation: no I/O, no threads, no
//! shared state between calls. Locating reads, reference files, BAM
//! parsing and writing all belong to the embedding application, which
//! hands in [`read::AlignedRead`] values grouped by duplicate position and
//! a [`reference::ReferenceLookup`] for tie-breaking.
//!
//! ```
//! use umidup::config::UmiConfig;
//! use umidup::grouper::UmiGrouper;
//! use umidup::read::AlignedReadBuilder;
//! use umidup::reference::NoReference;
//!
//! let mut grouper = UmiGrouper::new(UmiConfig::default(), NoReference);
//! let reads = vec![
//!     AlignedReadBuilder::new().name("r:1:ACGT").start(100).sequence(b"TTAGGC", 30).build(),
//!     AlignedReadBuilder::new().name("r:2:ACGT").start(100).sequence(b"TTAGGC", 25).build(),
//! ];
//! let out = grouper.process_position_group(reads).unwrap();
//! // Two originals plus one consensus read.
//! assert_eq!(out.len(), 3);
//! assert_eq!(out[2].name.as_deref(), Some("r:1:CNS_ACGT"));
//! ```

pub mod config;
pub mod consensus;
pub mod errors;
pub mod grouper;
pub mod metrics;
pub mod read;
pub mod reference;
pub mod umi;

pub use config::UmiConfig;
pub use consensus::{call_leg_consensus, ConsensusOutcome, LegConsensus};
pub use errors::{DedupError, Result};
pub use grouper::{DuplicateGroup, Leg, LegEmission, UmiGrouper};
pub use metrics::CollapseMetrics;
pub use read::{AlignedRead, AlignedReadBuilder, Cigar, CigarOp};
pub use reference::{InMemoryReference, NoReference, ReferenceLookup};

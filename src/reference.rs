//! Reference-base lookup seam.
//!
//! Tie-breaking during base voting consults the reference genome, which is
//! owned by an external collaborator. This module only defines the lookup
//! trait plus a small in-memory implementation for tests and embedders that
//! already hold sequence in memory.

use ahash::AHashMap;
use anyhow::{anyhow, Result};

/// Read-only accessor for single reference bases.
///
/// Implementations are assumed thread-safe by the caller's concurrency
/// model; this subsystem itself only ever issues synchronous lookups.
pub trait ReferenceLookup {
    /// Returns the reference base at a 1-based position on `contig`.
    ///
    /// # Errors
    ///
    /// Fails when the contig is unknown or the position is out of range;
    /// such failures are fatal to the calling build, not recoverable here.
    fn base(&self, contig: &str, pos: u64) -> Result<u8>;
}

/// In-memory reference: a map from contig name to its full sequence.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReference {
    contigs: AHashMap<String, Vec<u8>>,
}

impl InMemoryReference {
    /// Creates an empty reference.
    #[must_use]
    pub fn new() -> Self {
        Self { contigs: AHashMap::new() }
    }

    /// Adds (or replaces) a contig sequence.
    pub fn add_contig(&mut self, name: &str, sequence: &[u8]) {
        self.contigs.insert(name.to_string(), sequence.to_ascii_uppercase());
    }
}

impl ReferenceLookup for InMemoryReference {
    fn base(&self, contig: &str, pos: u64) -> Result<u8> {
        let seq = self
            .contigs
            .get(contig)
            .ok_or_else(|| anyhow!("contig '{contig}' not present in reference"))?;
        if pos == 0 || pos as usize > seq.len() {
            return Err(anyhow!(
                "position {pos} out of range for contig '{contig}' (length {})",
                seq.len()
            ));
        }
        Ok(seq[pos as usize - 1])
    }
}

/// A reference that answers every lookup with `N`.
///
/// Useful when no reference is available: sum ties then fall through to
/// iteration order, and nothing else in the build consults the genome.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReference;

impl ReferenceLookup for NoReference {
    fn base(&self, _contig: &str, _pos: u64) -> Result<u8> {
        Ok(b'N')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_lookup_is_one_based() {
        let mut reference = InMemoryReference::new();
        reference.add_contig("chr1", b"acgt");
        assert_eq!(reference.base("chr1", 1).unwrap(), b'A');
        assert_eq!(reference.base("chr1", 4).unwrap(), b'T');
        assert!(reference.base("chr1", 0).is_err());
        assert!(reference.base("chr1", 5).is_err());
        assert!(reference.base("chr2", 1).is_err());
    }
}

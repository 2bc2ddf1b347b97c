//! Aligned-read model and boundary computation.
//!
//! This module defines the in-memory representation of an aligned read as the
//! collapsing subsystem consumes it: bases, qualities, a CIGAR, pairing
//! metadata and a small attribute bag. Reads are produced by an upstream
//! parsing stage and are read-only here.
//!
//! It also provides the clip/alignment boundary math used to aggregate a
//! read group's outer span: unclipped start/end and alignment end are pure
//! functions of the CIGAR and the 1-based alignment start.

use ahash::AHashMap;

use crate::errors::{DedupError, Result};

/// A single CIGAR operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// Alignment match or mismatch (consumes query and reference).
    Match,
    /// Insertion to the reference (consumes query only).
    Insertion,
    /// Deletion from the reference (consumes reference only).
    Deletion,
    /// Skipped region from the reference, e.g. an intron (reference only).
    Skip,
    /// Soft clipping: bases present in the read but not aligned (query only).
    SoftClip,
    /// Hard clipping: bases absent from the read (consumes neither).
    HardClip,
    /// Silent padding (consumes neither).
    Pad,
}

impl CigarOp {
    /// Returns true if this operation consumes read (query) bases.
    #[inline]
    #[must_use]
    pub fn consumes_query(self) -> bool {
        matches!(self, CigarOp::Match | CigarOp::Insertion | CigarOp::SoftClip)
    }

    /// Returns true if this operation consumes reference bases.
    #[inline]
    #[must_use]
    pub fn consumes_reference(self) -> bool {
        matches!(self, CigarOp::Match | CigarOp::Deletion | CigarOp::Skip)
    }

    /// Single-character code, as written in SAM CIGAR strings.
    #[must_use]
    pub fn code(self) -> char {
        match self {
            CigarOp::Match => 'M',
            CigarOp::Insertion => 'I',
            CigarOp::Deletion => 'D',
            CigarOp::Skip => 'N',
            CigarOp::SoftClip => 'S',
            CigarOp::HardClip => 'H',
            CigarOp::Pad => 'P',
        }
    }
}

/// An alignment descriptor: ordered (operation, length) pairs.
pub type Cigar = Vec<(CigarOp, usize)>;

/// Parses a CIGAR string such as `"5S45M1I49M"` into a [`Cigar`].
///
/// # Errors
///
/// Returns an error on zero-length operations, unknown operation codes, or
/// a dangling length with no operation.
///
/// # Examples
///
/// ```
/// use umidup::read::{cigar_from_str, CigarOp};
///
/// let cigar = cigar_from_str("3S47M").unwrap();
/// assert_eq!(cigar, vec![(CigarOp::SoftClip, 3), (CigarOp::Match, 47)]);
/// ```
pub fn cigar_from_str(s: &str) -> Result<Cigar> {
    let mut cigar = Cigar::new();
    let mut len: usize = 0;
    let mut have_len = false;

    for c in s.chars() {
        if let Some(d) = c.to_digit(10) {
            len = len * 10 + d as usize;
            have_len = true;
            continue;
        }
        let op = match c {
            'M' | '=' | 'X' => CigarOp::Match,
            'I' => CigarOp::Insertion,
            'D' => CigarOp::Deletion,
            'N' => CigarOp::Skip,
            'S' => CigarOp::SoftClip,
            'H' => CigarOp::HardClip,
            'P' => CigarOp::Pad,
            other => {
                return Err(DedupError::InvalidCigar {
                    cigar: s.to_string(),
                    reason: format!("unknown operation '{other}'"),
                });
            }
        };
        if !have_len || len == 0 {
            return Err(DedupError::InvalidCigar {
                cigar: s.to_string(),
                reason: "operation with zero or missing length".to_string(),
            });
        }
        cigar.push((op, len));
        len = 0;
        have_len = false;
    }

    if have_len {
        return Err(DedupError::InvalidCigar {
            cigar: s.to_string(),
            reason: "trailing length with no operation".to_string(),
        });
    }
    Ok(cigar)
}

/// Formats a [`Cigar`] back into its SAM string form.
#[must_use]
pub fn cigar_to_string(cigar: &[(CigarOp, usize)]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(cigar.len() * 3);
    for &(op, len) in cigar {
        // Infallible for String targets.
        let _ = write!(s, "{len}{}", op.code());
    }
    s
}

/// A value stored in a read's attribute bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Integer attribute (e.g. a contributing-read count).
    Int(i64),
    /// String attribute (e.g. a supplementary-alignment descriptor).
    String(String),
}

/// Two-byte attribute key, as used for SAM-style tags.
pub type AttrKey = [u8; 2];

/// An immutable aligned read as handed to this subsystem.
///
/// Produced by an upstream parsing stage; the collapsing code never mutates
/// the reads it is given, only synthesizes new ones.
///
/// Invariant: `bases.len() == quals.len()` and both equal the total length
/// of query-consuming CIGAR operations. [`AlignedRead::validate`] checks
/// this for externally supplied reads.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Read identifier. Optional: callers may omit it to save memory when
    /// UMI handling is disabled.
    pub name: Option<String>,
    /// Reference contig this read is aligned to.
    pub contig: String,
    /// 1-based leftmost alignment position.
    pub start: u64,
    /// Alignment descriptor.
    pub cigar: Cigar,
    /// Base calls.
    pub bases: Vec<u8>,
    /// Per-base Phred qualities.
    pub quals: Vec<u8>,
    /// True if aligned to the reverse strand.
    pub reverse: bool,
    /// True if the read is part of a pair.
    pub paired: bool,
    /// True if the read is the first segment of its pair.
    pub first_of_pair: bool,
    /// Mate contig, when paired and the mate is mapped.
    pub mate_contig: Option<String>,
    /// Mate 1-based alignment start, when paired and the mate is mapped.
    pub mate_start: Option<u64>,
    /// Signed observed template length.
    pub insert_size: i64,
    /// True for supplementary alignment records.
    pub supplementary: bool,
    /// True if the read has been flagged as a duplicate.
    pub duplicate: bool,
    /// Attribute bag (SAM-style two-byte tags).
    pub attrs: AHashMap<AttrKey, AttrValue>,
}

impl AlignedRead {
    /// Number of bases in the read.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// True if the read carries no bases.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Total length of reference-consuming CIGAR operations.
    #[must_use]
    pub fn reference_len(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|(op, _)| op.consumes_reference())
            .map(|&(_, len)| len as u64)
            .sum()
    }

    /// 1-based inclusive alignment end position.
    #[must_use]
    pub fn alignment_end(&self) -> u64 {
        self.start + self.reference_len().saturating_sub(1)
    }

    /// Length of the leading soft clip, 0 if the read is not left-clipped.
    ///
    /// Hard clips carry no bases and are skipped over.
    #[must_use]
    pub fn leading_soft_clip(&self) -> usize {
        for &(op, len) in &self.cigar {
            match op {
                CigarOp::HardClip => {}
                CigarOp::SoftClip => return len,
                _ => return 0,
            }
        }
        0
    }

    /// Length of the trailing soft clip, 0 if the read is not right-clipped.
    #[must_use]
    pub fn trailing_soft_clip(&self) -> usize {
        for &(op, len) in self.cigar.iter().rev() {
            match op {
                CigarOp::HardClip | CigarOp::Pad => {}
                CigarOp::SoftClip => return len,
                _ => return 0,
            }
        }
        0
    }

    /// Alignment start extended leftward over the leading soft clip.
    #[must_use]
    pub fn unclipped_start(&self) -> u64 {
        self.start.saturating_sub(self.leading_soft_clip() as u64)
    }

    /// Alignment end extended rightward over the trailing soft clip.
    #[must_use]
    pub fn unclipped_end(&self) -> u64 {
        self.alignment_end() + self.trailing_soft_clip() as u64
    }

    /// True if the CIGAR contains an insertion or deletion.
    #[must_use]
    pub fn has_indel(&self) -> bool {
        self.cigar
            .iter()
            .any(|(op, _)| matches!(op, CigarOp::Insertion | CigarOp::Deletion))
    }

    /// Looks up a string attribute.
    #[must_use]
    pub fn string_attr(&self, key: AttrKey) -> Option<&str> {
        match self.attrs.get(&key) {
            Some(AttrValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Looks up an integer attribute.
    #[must_use]
    pub fn int_attr(&self, key: AttrKey) -> Option<i64> {
        match self.attrs.get(&key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Checks the base/quality/CIGAR length invariant.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::MalformedRead`] when `bases`, `quals` and the
    /// query-consuming CIGAR length disagree.
    pub fn validate(&self) -> Result<()> {
        let query_len: usize =
            self.cigar.iter().filter(|(op, _)| op.consumes_query()).map(|&(_, len)| len).sum();
        if self.bases.len() != self.quals.len() || self.bases.len() != query_len {
            return Err(DedupError::MalformedRead {
                name: self.name.clone().unwrap_or_default(),
                reason: format!(
                    "bases ({}), qualities ({}) and CIGAR query length ({}) disagree",
                    self.bases.len(),
                    self.quals.len(),
                    query_len
                ),
            });
        }
        Ok(())
    }
}

/// Fluent builder for [`AlignedRead`], primarily for tests and embedders
/// that synthesize reads.
#[derive(Debug, Clone)]
pub struct AlignedReadBuilder {
    read: AlignedRead,
}

impl AlignedReadBuilder {
    /// Starts a builder with an unpaired forward read on contig `"chr1"`
    /// at position 1 and an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            read: AlignedRead {
                name: None,
                contig: "chr1".to_string(),
                start: 1,
                cigar: Cigar::new(),
                bases: Vec::new(),
                quals: Vec::new(),
                reverse: false,
                paired: false,
                first_of_pair: false,
                mate_contig: None,
                mate_start: None,
                insert_size: 0,
                supplementary: false,
                duplicate: false,
                attrs: AHashMap::new(),
            },
        }
    }

    /// Sets the read identifier.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.read.name = Some(name.to_string());
        self
    }

    /// Sets the reference contig.
    #[must_use]
    pub fn contig(mut self, contig: &str) -> Self {
        self.read.contig = contig.to_string();
        self
    }

    /// Sets the 1-based alignment start.
    #[must_use]
    pub fn start(mut self, start: u64) -> Self {
        self.read.start = start;
        self
    }

    /// Sets bases and gives every base the same quality.
    #[must_use]
    pub fn sequence(mut self, bases: &[u8], qual: u8) -> Self {
        self.read.bases = bases.to_vec();
        self.read.quals = vec![qual; bases.len()];
        self
    }

    /// Sets per-base qualities (must match the base count).
    #[must_use]
    pub fn quals(mut self, quals: &[u8]) -> Self {
        self.read.quals = quals.to_vec();
        self
    }

    /// Sets the CIGAR from a SAM-style string.
    ///
    /// # Panics
    ///
    /// Panics on an unparseable CIGAR string; builders are for synthesized
    /// reads where that is a programming error.
    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.read.cigar = cigar_from_str(cigar).expect("builder CIGAR must parse");
        self
    }

    /// Marks the read as reverse-strand.
    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.read.reverse = reverse;
        self
    }

    /// Sets pairing metadata.
    #[must_use]
    pub fn paired(mut self, first_of_pair: bool) -> Self {
        self.read.paired = true;
        self.read.first_of_pair = first_of_pair;
        self
    }

    /// Sets the mate position.
    #[must_use]
    pub fn mate(mut self, contig: &str, start: u64) -> Self {
        self.read.mate_contig = Some(contig.to_string());
        self.read.mate_start = Some(start);
        self
    }

    /// Sets the signed insert size.
    #[must_use]
    pub fn insert_size(mut self, insert_size: i64) -> Self {
        self.read.insert_size = insert_size;
        self
    }

    /// Marks the read as a supplementary alignment.
    #[must_use]
    pub fn supplementary(mut self, supplementary: bool) -> Self {
        self.read.supplementary = supplementary;
        self
    }

    /// Marks the read as a duplicate.
    #[must_use]
    pub fn duplicate(mut self, duplicate: bool) -> Self {
        self.read.duplicate = duplicate;
        self
    }

    /// Adds a string attribute.
    #[must_use]
    pub fn string_attr(mut self, key: AttrKey, value: &str) -> Self {
        self.read.attrs.insert(key, AttrValue::String(value.to_string()));
        self
    }

    /// Finishes the builder. If no CIGAR was set, a full-length match is
    /// assumed.
    #[must_use]
    pub fn build(mut self) -> AlignedRead {
        if self.read.cigar.is_empty() && !self.read.bases.is_empty() {
            self.read.cigar = vec![(CigarOp::Match, self.read.bases.len())];
        }
        self.read
    }
}

impl Default for AlignedReadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn read_with_cigar(start: u64, cigar: &str) -> AlignedRead {
        let query_len: usize = cigar_from_str(cigar)
            .unwrap()
            .iter()
            .filter(|(op, _)| op.consumes_query())
            .map(|&(_, len)| len)
            .sum();
        AlignedReadBuilder::new()
            .name("q1")
            .start(start)
            .sequence(&vec![b'A'; query_len], 30)
            .cigar(cigar)
            .build()
    }

    #[rstest]
    #[case("50M", 100, 100, 149, 149)]
    #[case("5S45M", 100, 95, 144, 144)]
    #[case("45M5S", 100, 100, 144, 149)]
    #[case("3S44M3S", 100, 97, 143, 146)]
    #[case("2H5S43M", 100, 95, 142, 142)]
    fn test_unclipped_boundaries(
        #[case] cigar: &str,
        #[case] start: u64,
        #[case] unclipped_start: u64,
        #[case] aligned_end: u64,
        #[case] unclipped_end: u64,
    ) {
        let read = read_with_cigar(start, cigar);
        assert_eq!(read.unclipped_start(), unclipped_start);
        assert_eq!(read.alignment_end(), aligned_end);
        assert_eq!(read.unclipped_end(), unclipped_end);
    }

    #[test]
    fn test_deletion_extends_reference_span() {
        let read = read_with_cigar(100, "20M5D30M");
        assert_eq!(read.len(), 50);
        assert_eq!(read.reference_len(), 55);
        assert_eq!(read.alignment_end(), 154);
        assert!(read.has_indel());
    }

    #[test]
    fn test_insertion_does_not_extend_reference_span() {
        let read = read_with_cigar(100, "20M5I25M");
        assert_eq!(read.len(), 50);
        assert_eq!(read.reference_len(), 45);
        assert_eq!(read.alignment_end(), 144);
        assert!(read.has_indel());
    }

    #[test]
    fn test_pure_match_has_no_indel() {
        let read = read_with_cigar(100, "5S40M5S");
        assert!(!read.has_indel());
    }

    #[test]
    fn test_cigar_round_trip() {
        let s = "3S20M1I19M2D7M3S";
        assert_eq!(cigar_to_string(&cigar_from_str(s).unwrap()), s);
    }

    #[rstest]
    #[case("10M5")]
    #[case("M")]
    #[case("0M")]
    #[case("10Q")]
    fn test_cigar_parse_errors(#[case] s: &str) {
        assert!(cigar_from_str(s).is_err());
    }

    #[test]
    fn test_validate_catches_length_mismatch() {
        let mut read = read_with_cigar(100, "50M");
        read.quals.pop();
        assert!(read.validate().is_err());
        let read = read_with_cigar(100, "50M");
        assert!(read.validate().is_ok());
    }
}

//! UMI extraction, correction and fuzzy clustering.
//!
//! UMIs are short synthetic barcodes attached before amplification;
//! sequencing errors in the UMI itself can make reads from one molecule
//! appear to carry different tags. This module groups reads by exact UMI and
//! then folds smaller groups into larger ones within a fixed mismatch
//! budget, balancing error correction against over-correction: a group is
//! only absorbed by a seed at least as abundant as itself.
//!
//! Two UMIs of unequal length are never considered matching; a length
//! difference is treated as exceeding any threshold.

use ahash::AHashMap;

/// A UMI token sliced from a read identifier.
pub type UmiId = String;

/// Extracts the UMI token from a read identifier: the substring following
/// the last occurrence of `delimiter`.
///
/// Returns `None` when the identifier contains no delimiter or ends with it.
///
/// # Examples
///
/// ```
/// use umidup::umi::extract_umi;
///
/// assert_eq!(extract_umi("inst:42:ACGTACGT", ':'), Some("ACGTACGT"));
/// assert_eq!(extract_umi("no-delimiter", ':'), None);
/// ```
#[must_use]
pub fn extract_umi(identifier: &str, delimiter: char) -> Option<&str> {
    match identifier.rsplit_once(delimiter) {
        Some((_, umi)) if !umi.is_empty() => Some(umi),
        _ => None,
    }
}

/// Counts mismatched positions between two UMIs.
///
/// UMIs of different lengths return `usize::MAX`, so a length difference
/// always exceeds any edit-distance threshold.
#[must_use]
pub fn count_mismatches(a: &str, b: &str) -> usize {
    if a.len() != b.len() {
        return usize::MAX;
    }
    a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count()
}

/// Corrects an extracted UMI to a caller-supplied defined set.
///
/// Exact membership wins immediately; otherwise every defined UMI is
/// compared and the closest within `max_distance` is chosen (first defined
/// UMI on a distance tie). Returns `None` when nothing in the set is close
/// enough.
#[must_use]
pub fn correct_to_defined<'a>(
    umi: &str,
    defined: &'a [String],
    max_distance: usize,
) -> Option<&'a str> {
    if let Some(exact) = defined.iter().find(|d| d.as_str() == umi) {
        return Some(exact.as_str());
    }

    let mut best: Option<(&'a str, usize)> = None;
    for candidate in defined {
        let dist = count_mismatches(umi, candidate);
        if dist <= max_distance && best.is_none_or(|(_, d)| dist < d) {
            best = Some((candidate.as_str(), dist));
        }
    }
    best.map(|(c, _)| c)
}

/// One cluster of reads sharing a (possibly corrected) UMI.
#[derive(Debug, Clone)]
pub struct UmiCluster {
    /// The cluster's representative UMI (the seed group's UMI).
    pub umi: UmiId,
    /// Indices into the caller's read collection, in input order within
    /// each folded group, seed group first.
    pub read_indices: Vec<usize>,
}

/// Groups reads by exact UMI, preserving first-seen order of the groups.
fn exact_groups(umis: &[UmiId]) -> Vec<(UmiId, Vec<usize>)> {
    let mut order: Vec<UmiId> = Vec::new();
    let mut buckets: AHashMap<&str, Vec<usize>> = AHashMap::new();
    for (idx, umi) in umis.iter().enumerate() {
        let entry = buckets.entry(umi.as_str()).or_default();
        if entry.is_empty() {
            order.push(umi.clone());
        }
        entry.push(idx);
    }
    order
        .into_iter()
        .map(|umi| {
            let indices = buckets.remove(umi.as_str()).unwrap_or_default();
            (umi, indices)
        })
        .collect()
}

/// Clusters one position group's UMIs by exact match plus greedy fuzzy
/// merging.
///
/// Exact groups are sorted by descending member count (stable, so equal
/// counts keep first-seen order). The largest remaining group seeds a
/// cluster; any other group whose UMI is within `max_distance` of the
/// seed's UMI or of any UMI already folded in, and whose member count does
/// not exceed the seed's, is folded in. Folding repeats until no further
/// group qualifies, then the next largest remaining group seeds the next
/// cluster.
#[must_use]
pub fn cluster_umis(umis: &[UmiId], max_distance: usize) -> Vec<UmiCluster> {
    let mut groups = exact_groups(umis);
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut consumed = vec![false; groups.len()];
    let mut clusters = Vec::new();

    for seed_idx in 0..groups.len() {
        if consumed[seed_idx] {
            continue;
        }
        consumed[seed_idx] = true;

        let seed_count = groups[seed_idx].1.len();
        let mut member_umis: Vec<&str> = vec![groups[seed_idx].0.as_str()];
        let mut read_indices = groups[seed_idx].1.clone();

        // Transitive folding: each newly absorbed UMI widens the net, so
        // rescan until a pass absorbs nothing.
        loop {
            let mut absorbed_any = false;
            for (idx, (umi, indices)) in groups.iter().enumerate() {
                if consumed[idx] || indices.len() > seed_count {
                    continue;
                }
                let within = member_umis
                    .iter()
                    .any(|member| count_mismatches(member, umi) <= max_distance);
                if within {
                    consumed[idx] = true;
                    member_umis.push(umi.as_str());
                    read_indices.extend_from_slice(indices);
                    absorbed_any = true;
                }
            }
            if !absorbed_any {
                break;
            }
        }

        clusters.push(UmiCluster { umi: groups[seed_idx].0.clone(), read_indices });
    }

    clusters
}

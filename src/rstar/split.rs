//! Topological node split.
//!
//! Axis choice minimizes the total margin over all candidate distributions;
//! the distribution on the winning axis is the one with least overlap
//! between the two halves, ties broken by smaller combined area. Both
//! halves end up within `[min_fill, capacity]`.

use std::cmp::Ordering;

use crate::mbr::Mbr;

use super::types::{DirEntry, LeafEntry};

/// Anything splittable: exposes the box the split cost measures see.
pub(super) trait SplitEntry: Clone {
    fn split_mbr(&self) -> Mbr;
}

impl SplitEntry for LeafEntry {
    fn split_mbr(&self) -> Mbr {
        Mbr::from_point(&self.point)
    }
}

impl SplitEntry for DirEntry {
    fn split_mbr(&self) -> Mbr {
        self.mbr.clone()
    }
}

fn sort_entries<E: SplitEntry>(entries: &mut [E], axis: usize, by_max: bool) {
    entries.sort_by(|a, b| {
        let (ma, mb) = (a.split_mbr(), b.split_mbr());
        let (pa, sa, pb, sb) = if by_max {
            (ma.max(axis), ma.min(axis), mb.max(axis), mb.min(axis))
        } else {
            (ma.min(axis), ma.max(axis), mb.min(axis), mb.max(axis))
        };
        pa.partial_cmp(&pb)
            .unwrap_or(Ordering::Equal)
            .then(sa.partial_cmp(&sb).unwrap_or(Ordering::Equal))
    });
}

/// `out[i]` covers `entries[..=i]`.
fn prefix_mbrs<E: SplitEntry>(entries: &[E]) -> Vec<Mbr> {
    let mut out = Vec::with_capacity(entries.len());
    let mut acc = entries[0].split_mbr();
    out.push(acc.clone());
    for e in &entries[1..] {
        acc.expand(&e.split_mbr());
        out.push(acc.clone());
    }
    out
}

/// `out[i]` covers `entries[i..]`.
fn suffix_mbrs<E: SplitEntry>(entries: &[E]) -> Vec<Mbr> {
    let mut out = vec![Mbr::empty(0); entries.len()];
    let mut acc = entries[entries.len() - 1].split_mbr();
    out[entries.len() - 1] = acc.clone();
    for i in (0..entries.len() - 1).rev() {
        acc.expand(&entries[i].split_mbr());
        out[i] = acc.clone();
    }
    out
}

/// Split an overfull entry list into two halves.
pub(super) fn topological_split<E: SplitEntry>(
    mut entries: Vec<E>,
    min_fill: usize,
) -> (Vec<E>, Vec<E>) {
    let n = entries.len();
    let min_fill = min_fill.max(1);
    debug_assert!(n >= 2 * min_fill);
    let dims = entries[0].split_mbr().dims();

    // Axis choice by minimum margin sum.
    let mut best_axis = 0;
    let mut best_margin = f64::INFINITY;
    for axis in 0..dims {
        let mut margin = 0.0;
        for by_max in [false, true] {
            sort_entries(&mut entries, axis, by_max);
            let prefix = prefix_mbrs(&entries);
            let suffix = suffix_mbrs(&entries);
            for k in min_fill..=n - min_fill {
                margin += prefix[k - 1].margin() + suffix[k].margin();
            }
        }
        if margin < best_margin {
            best_margin = margin;
            best_axis = axis;
        }
    }

    // Distribution choice: least overlap, ties by smaller total area.
    let mut best = (f64::INFINITY, f64::INFINITY, false, n / 2);
    for by_max in [false, true] {
        sort_entries(&mut entries, best_axis, by_max);
        let prefix = prefix_mbrs(&entries);
        let suffix = suffix_mbrs(&entries);
        for k in min_fill..=n - min_fill {
            let overlap = prefix[k - 1].overlap(&suffix[k]);
            let area = prefix[k - 1].area() + suffix[k].area();
            if overlap < best.0 || (overlap == best.0 && area < best.1) {
                best = (overlap, area, by_max, k);
            }
        }
    }
    let (_, _, by_max, split_at) = best;

    sort_entries(&mut entries, best_axis, by_max);
    let second = entries.split_off(split_at);
    (entries, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::ObjectId;

    fn points(coords: &[(f64, f64)]) -> Vec<LeafEntry> {
        coords
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| LeafEntry {
                id: i as ObjectId,
                point: vec![x, y],
            })
            .collect()
    }

    #[test]
    fn test_split_respects_min_fill() {
        let entries = points(&[
            (0.0, 0.0),
            (1.0, 1.0),
            (2.0, 0.5),
            (10.0, 10.0),
            (11.0, 11.0),
        ]);
        let (a, b) = topological_split(entries, 2);
        assert!(a.len() >= 2 && b.len() >= 2);
        assert_eq!(a.len() + b.len(), 5);
    }

    #[test]
    fn test_split_separates_clusters() {
        // Two tight clusters far apart must not be mixed.
        let entries = points(&[
            (0.0, 0.0),
            (0.1, 0.1),
            (0.2, 0.0),
            (100.0, 100.0),
            (100.1, 100.2),
            (100.2, 100.1),
        ]);
        let (a, b) = topological_split(entries, 2);
        for half in [&a, &b] {
            let near = half.iter().filter(|e| e.point[0] < 50.0).count();
            assert!(near == 0 || near == half.len(), "clusters were mixed");
        }
    }

    #[test]
    fn test_split_directory_entries() {
        let children: Vec<DirEntry> = (0..5)
            .map(|i| DirEntry {
                mbr: Mbr::new(vec![i as f64 * 10.0, 0.0], vec![i as f64 * 10.0 + 1.0, 1.0]),
                page: i + 1,
            })
            .collect();
        let (a, b) = topological_split(children, 2);
        assert_eq!(a.len() + b.len(), 5);
        // Disjoint boxes split along x into two non-overlapping runs.
        let max_a = a.iter().map(|c| c.mbr.max(0)).fold(f64::MIN, f64::max);
        let min_a = a.iter().map(|c| c.mbr.min(0)).fold(f64::MAX, f64::min);
        let max_b = b.iter().map(|c| c.mbr.max(0)).fold(f64::MIN, f64::max);
        let min_b = b.iter().map(|c| c.mbr.min(0)).fold(f64::MAX, f64::min);
        assert!(max_a <= min_b || max_b <= min_a, "halves overlap on x");
    }
}

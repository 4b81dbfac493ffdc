//! Sort-tile-recursive partitioning for bulk loading.
//!
//! Entries are sorted by their center along one axis, cut into balanced
//! slabs, and each slab is recursively tiled along the next axis until a
//! slab fits into one node. Groups come out spatially compact, so the
//! bottom-up build produces well-separated nodes in a single pass.

use std::cmp::Ordering;

/// Partition `items` into groups of at most `capacity`, keyed by center.
pub(super) fn str_groups<T>(
    items: Vec<T>,
    dims: usize,
    capacity: usize,
    center: impl Fn(&T) -> Vec<f64>,
) -> Vec<Vec<T>> {
    let keyed: Vec<(Vec<f64>, T)> = items.into_iter().map(|t| (center(&t), t)).collect();
    let mut out = Vec::new();
    tile(keyed, 0, dims, capacity, &mut out);
    out
}

fn tile<T>(
    mut items: Vec<(Vec<f64>, T)>,
    axis: usize,
    dims: usize,
    capacity: usize,
    out: &mut Vec<Vec<T>>,
) {
    if items.len() <= capacity {
        if !items.is_empty() {
            out.push(items.into_iter().map(|(_, t)| t).collect());
        }
        return;
    }

    let groups = (items.len() + capacity - 1) / capacity;
    let slabs = (groups as f64)
        .powf(1.0 / dims as f64)
        .ceil()
        .max(2.0) as usize;
    items.sort_by(|a, b| a.0[axis].partial_cmp(&b.0[axis]).unwrap_or(Ordering::Equal));

    let next = (axis + 1) % dims;
    for slab in balanced_chunks(items, slabs) {
        tile(slab, next, dims, capacity, out);
    }
}

/// Cut a vector into `parts` contiguous pieces whose lengths differ by at
/// most one.
fn balanced_chunks<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let len = items.len();
    let base = len / parts;
    let extra = len % parts;
    let mut out = Vec::with_capacity(parts);
    let mut remaining = items;
    for i in 0..parts {
        let take = (base + usize::from(i < extra)).min(remaining.len());
        let rest = remaining.split_off(take);
        out.push(remaining);
        remaining = rest;
    }
    out
}

//! Time-shared capacity scheduler.
//!
//! The same max-min fair share function is used at both levels of the hierarchy: a host dividing its PEs among
//! VMs and a VM dividing its granted envelope among workloads. Only the units of the consumers differ.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::{ensure_non_negative, Error, Result};

/// Divides `total_capacity` among `consumers` given as `(id, requested capacity)` pairs.
///
/// Without contention (requests sum up to at most the capacity) every consumer gets exactly what it asked for.
/// Otherwise the capacity is shared max-min fairly: consumers asking less than the equal share keep their request
/// and the rest is split evenly among the remaining ones. The result is computed through a single water level, so
/// equal requests receive identical grants and the input order does not matter.
///
/// Zero requests are granted zero, an empty input gives an empty mapping.
pub fn allocate<K>(total_capacity: f64, consumers: &[(K, f64)]) -> Result<BTreeMap<K, f64>>
where
    K: Ord + Copy + Debug,
{
    ensure_non_negative("total capacity", total_capacity)?;
    let mut grants = BTreeMap::new();
    for &(id, requested) in consumers {
        ensure_non_negative("requested capacity", requested)?;
        if grants.insert(id, requested).is_some() {
            return Err(Error::DuplicateConsumer(format!("{:?}", id)));
        }
    }

    let requested_total: f64 = grants.values().sum();
    if requested_total <= total_capacity {
        return Ok(grants);
    }

    let level = fit_level(total_capacity, &grants, water_level(total_capacity, grants.values().copied()));
    for grant in grants.values_mut() {
        *grant = grant.min(level);
    }
    Ok(grants)
}

/// Lowers the level until the capped grants, summed in key order, do not exceed `total`.
///
/// Rounding in [`water_level`] can leave the sum a few ulps above the capacity.
fn fit_level<K>(total: f64, requests: &BTreeMap<K, f64>, mut level: f64) -> f64 {
    while level.is_finite() && level > 0. {
        let granted: f64 = requests.values().map(|request| request.min(level)).sum();
        if granted <= total {
            break;
        }
        let capped = requests.values().filter(|request| **request >= level).count().max(1);
        let lowered = level - (granted - total) / capped as f64;
        level = lowered.min(f64::from_bits(level.to_bits() - 1)).max(0.);
    }
    level
}

/// Returns the per-consumer cap such that `sum(min(request, cap)) == total`.
///
/// Must only be called under contention, otherwise the level is unbounded.
fn water_level(total: f64, requests: impl Iterator<Item = f64>) -> f64 {
    let mut active: Vec<f64> = requests.filter(|r| *r > 0.).collect();
    active.sort_by(|a, b| a.total_cmp(b));

    let mut remaining = total;
    let mut left = active.len();
    for request in active {
        let share = remaining / left as f64;
        if request > share {
            return share;
        }
        remaining -= request;
        left -= 1;
    }
    f64::INFINITY
}

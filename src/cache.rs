//! Recompute-or-reuse access to the sorting's property store.
//!
//! Lookups and stores are split so a batch can read the cache, fan the
//! missing units out to workers, and write results back from the
//! coordinating thread once the workers have joined.

use crate::config::CachePolicy;
use crate::error::Result;
use crate::properties::{PropertyKey, PropertyValue};
use crate::sorting::Sorting;
use crate::UnitId;

/// Stored value of `key` for `unit_id`, if `policy` allows reuse and `accept` takes it
pub fn lookup<S, A>(
    sorting: &S,
    unit_id: UnitId,
    key: &PropertyKey,
    policy: CachePolicy,
    accept: A,
) -> Option<PropertyValue>
where
    S: Sorting + ?Sized,
    A: Fn(&PropertyValue) -> bool,
{
    if !policy.reads() {
        return None;
    }
    let value = sorting.get_property(unit_id, key)?;
    if accept(value) {
        tracing::debug!(unit = unit_id, %key, "reusing stored property");
        Some(value.clone())
    } else {
        tracing::debug!(unit = unit_id, %key, "stored property is stale");
        None
    }
}

/// Persist a freshly computed value when `policy` writes
pub fn store<S>(
    sorting: &mut S,
    unit_id: UnitId,
    key: PropertyKey,
    value: PropertyValue,
    policy: CachePolicy,
) -> Result<()>
where
    S: Sorting + ?Sized,
{
    if policy.writes() {
        sorting.set_property(unit_id, key, value)?;
    }
    Ok(())
}

/// Return the stored value when `policy` allows reuse and `accept` takes it;
/// otherwise compute it and store it per `policy`.
pub fn get_or_compute_if<S, A, F>(
    sorting: &mut S,
    unit_id: UnitId,
    key: PropertyKey,
    policy: CachePolicy,
    accept: A,
    compute: F,
) -> Result<PropertyValue>
where
    S: Sorting + ?Sized,
    A: Fn(&PropertyValue) -> bool,
    F: FnOnce() -> Result<PropertyValue>,
{
    if let Some(value) = lookup(sorting, unit_id, &key, policy, accept) {
        return Ok(value);
    }
    let value = compute()?;
    store(sorting, unit_id, key, value.clone(), policy)?;
    Ok(value)
}

/// [`get_or_compute_if`] accepting any stored value
pub fn get_or_compute<S, F>(
    sorting: &mut S,
    unit_id: UnitId,
    key: PropertyKey,
    policy: CachePolicy,
    compute: F,
) -> Result<PropertyValue>
where
    S: Sorting + ?Sized,
    F: FnOnce() -> Result<PropertyValue>,
{
    get_or_compute_if(sorting, unit_id, key, policy, |_| true, compute)
}

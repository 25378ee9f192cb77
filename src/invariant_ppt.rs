//! # Invariant Registry
//!
//! Records which internal invariants of the converter were asserted while it ran.
//! Tests use `contract_test` to prove a code path actually checked the rules it is
//! supposed to enforce (escaping safety, one terminal event per run, temp cleanup).

use std::collections::HashSet;
use std::sync::Mutex;
use lazy_static::lazy_static;
use log::error;

lazy_static! {
    /// Descriptions of every invariant that has held at least once.
    static ref CHECKED_INVARIANTS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Asserts that an internal invariant of the converter holds.
///
/// A violation is logged as critical. Debug and test builds panic so the bug
/// surfaces immediately; release builds keep going and let the normal error
/// path report the failed conversion.
///
/// # Arguments
/// * `condition` - The result of the check.
/// * `description` - Human-readable statement of the invariant.
/// * `component` - Optional component tag (e.g., "Escape", "Worker").
pub fn assert_invariant(condition: bool, description: &str, component: Option<&str>) {
    if !condition {
        let msg = format!(
            "INVARIANT VIOLATION [{}]: {}",
            component.unwrap_or("Converter"),
            description
        );
        error!("{}", msg);

        if cfg!(debug_assertions) || cfg!(test) {
            panic!("{}", msg);
        }
    } else if let Ok(mut set) = CHECKED_INVARIANTS.lock() {
        set.insert(description.to_string());
    }
}

/// Panics unless every invariant in `required_invariants` has been asserted.
#[cfg(test)]
pub fn contract_test(context: &str, required_invariants: &[&str]) {
    let checked = CHECKED_INVARIANTS.lock().unwrap();
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|req| !checked.contains(*req))
        .collect();

    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed. These invariants were never checked:\n{:#?}",
            context, missing
        );
    }
}

// src/dag/filter.rs

//! Selection of the steps to run from `skip` / `only` lists.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::dag::{Scheduled, canonical_name};
use crate::errors::{ConvoyError, Result};

/// Select the subset of `candidates` to run.
///
/// - Names are compared in canonical form, so `TopicUsers` and
///   `topic_users` refer to the same step.
/// - Two candidates with the same canonical name are a
///   [`ConvoyError::ConfigError`].
/// - Every name in `skip` and `only` must match a candidate; otherwise
///   [`ConvoyError::UnknownSteps`] reports the missing and the known names.
/// - With a non-empty `only`, only those steps are kept; `skip` is removed
///   afterwards.
/// - The transitive dependencies of every kept step are added back, except
///   dependencies that are explicitly skipped: an explicit skip always wins.
///
/// The result holds each step once, sorted by canonical name. Execution order
/// is decided by [`crate::dag::sort`].
pub fn filter<'a, T: Scheduled>(
    candidates: &'a [T],
    skip: &[String],
    only: &[String],
) -> Result<Vec<&'a T>> {
    let mut known: HashMap<String, &'a T> = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        let name = canonical_name(candidate.name());
        if known.insert(name.clone(), candidate).is_some() {
            return Err(ConvoyError::ConfigError(format!(
                "step name '{name}' is declared more than once"
            )));
        }
    }

    let missing: Vec<String> = skip
        .iter()
        .chain(only.iter())
        .filter(|name| !known.contains_key(&canonical_name(name)))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if !missing.is_empty() {
        let known_names: BTreeSet<String> = known.keys().cloned().collect();
        return Err(ConvoyError::UnknownSteps {
            missing,
            known: known_names.into_iter().collect(),
        });
    }

    let skip: BTreeSet<String> = skip.iter().map(|s| canonical_name(s)).collect();
    let only: BTreeSet<String> = only.iter().map(|s| canonical_name(s)).collect();

    let mut selected: BTreeMap<String, &'a T> = known
        .iter()
        .filter(|(name, _)| only.is_empty() || only.contains(*name))
        .filter(|(name, _)| !skip.contains(*name))
        .map(|(name, step)| (name.clone(), *step))
        .collect();

    let mut stack: Vec<&'a T> = selected.values().copied().collect();
    while let Some(step) = stack.pop() {
        for dep in step.dependencies() {
            let dep_name = canonical_name(dep);
            if selected.contains_key(&dep_name) {
                continue;
            }
            if skip.contains(&dep_name) {
                warn!(
                    step = %step.name(),
                    dependency = %dep_name,
                    "dependency is explicitly skipped; assuming its data is already staged"
                );
                continue;
            }
            match known.get(&dep_name) {
                Some(dep_step) => {
                    debug!(step = %step.name(), dependency = %dep_name, "adding required dependency");
                    selected.insert(dep_name, *dep_step);
                    stack.push(*dep_step);
                }
                None => {
                    // Left for the sorter to report as a missing dependency.
                    debug!(step = %step.name(), dependency = %dep_name, "dependency is not a known step");
                }
            }
        }
    }

    Ok(selected.into_values().collect())
}

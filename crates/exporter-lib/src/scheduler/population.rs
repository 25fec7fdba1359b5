//! Merging a fresh workload listing into the tracked population

use crate::models::Workload;
use std::collections::HashMap;

/// Merge a fresh listing with the previous population
///
/// Workloads present in both keep their previous record, new ones are taken
/// from `fresh` and workloads missing from `fresh` are dropped. The result
/// follows the order of `fresh`.
pub fn merge_population(previous: &[Workload], fresh: Vec<Workload>) -> Vec<Workload> {
    let known: HashMap<&str, &Workload> = previous.iter().map(|w| (w.id.as_str(), w)).collect();

    fresh
        .into_iter()
        .map(|workload| match known.get(workload.id.as_str()) {
            Some(existing) => (*existing).clone(),
            None => workload,
        })
        .collect()
}

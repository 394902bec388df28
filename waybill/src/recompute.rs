//! RecomputeEngine - keeps derived fields consistent with their sources.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::graph::DependencyGraph;
use crate::store::FieldStore;
use crate::value::FieldId;

/// What a recompute pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeReport {
    /// Derived fields whose formula was evaluated
    pub evaluated: usize,
    /// Derived fields whose stored value changed, in topological order
    pub changed: Vec<FieldId>,
}

/// Propagates source changes through a [`DependencyGraph`].
///
/// Each affected derived field is evaluated at most once per pass, after all
/// of its sources. A field is skipped when none of its sources changed during
/// the pass, so a pass over settled values writes nothing.
#[derive(Debug, Clone, Copy)]
pub struct RecomputeEngine<'g> {
    graph: &'g DependencyGraph,
}

impl<'g> RecomputeEngine<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self { graph }
    }

    /// Recompute everything downstream of one changed field.
    pub fn recompute(&self, store: &mut FieldStore, changed: &FieldId) -> RecomputeReport {
        self.recompute_many(store, std::slice::from_ref(changed))
    }

    /// Recompute everything downstream of a set of changed fields.
    pub fn recompute_many(&self, store: &mut FieldStore, changed: &[FieldId]) -> RecomputeReport {
        let affected: BTreeSet<usize> = changed
            .iter()
            .flat_map(|id| self.graph.downstream_positions(id.as_str()).iter().copied())
            .collect();

        let mut touched: HashSet<FieldId> = changed.iter().cloned().collect();
        self.run(store, affected, &mut touched, false)
    }

    /// Evaluate every derived field once, in topological order.
    ///
    /// Used after loading or restoring a whole record.
    pub fn recompute_all(&self, store: &mut FieldStore) -> RecomputeReport {
        let all = (0..self.graph.len()).collect();
        self.run(store, all, &mut HashSet::new(), true)
    }

    fn run(
        &self,
        store: &mut FieldStore,
        positions: BTreeSet<usize>,
        touched: &mut HashSet<FieldId>,
        force: bool,
    ) -> RecomputeReport {
        let mut report = RecomputeReport::default();

        for position in positions {
            let spec = self.graph.spec_at(position);
            if !force && !spec.sources.iter().any(|s| touched.contains(s)) {
                continue;
            }

            report.evaluated += 1;
            let value = spec.compute(store);
            match store.set(spec.id.as_str(), value) {
                Ok(true) => {
                    touched.insert(spec.id.clone());
                    report.changed.push(spec.id.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(field = %spec.id, error = %e, "Derived value rejected by store");
                }
            }
        }

        if !report.changed.is_empty() {
            debug!(
                evaluated = report.evaluated,
                changed = report.changed.len(),
                "Recomputed derived fields"
            );
        }
        report
    }
}

//! Derived field declarations and the dependency graph over them.
//!
//! The graph is built once per form type. Construction computes and caches a
//! topological order and, for every field, the ordered set of derived fields
//! downstream of it. A cycle is a configuration fault and fails construction.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::store::FieldStore;
use crate::value::{FieldId, FieldValue};

/// Error types for graph construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two specs share an id
    #[error("Derived field declared twice: {0}")]
    Duplicate(FieldId),

    /// The formula reads a field that is not a declared source
    #[error("Derived field {field} reads {input} without declaring it as a source")]
    UndeclaredSource { field: FieldId, input: FieldId },

    /// A field depends on itself, directly or transitively
    #[error("Dependency cycle through {0}")]
    CycleDetected(FieldId),
}

/// How a computed number is rounded before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    /// Store the raw result
    #[default]
    Exact,
    /// Round half away from zero to this many decimal places
    Places(u32),
}

impl Rounding {
    /// Two decimal places, used for money and hours.
    pub const CENTS: Rounding = Rounding::Places(2);

    pub fn apply(self, value: f64) -> f64 {
        let rounded = match self {
            Rounding::Exact => value,
            Rounding::Places(places) => {
                let factor = 10f64.powi(places as i32);
                (value * factor).round() / factor
            }
        };
        // -0.0 and 0.0 must store identically
        if rounded == 0.0 {
            0.0
        } else {
            rounded
        }
    }
}

/// How blank operands of sums and products are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullPolicy {
    /// Any blank operand blanks the result
    #[default]
    Propagate,
    /// Blank operands are left out; the result is blank only if all are blank
    SkipBlanks,
}

/// Pure formula over the current store values.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// Sum of the operands
    Sum(Vec<FieldId>),
    /// Product of the operands
    Product(Vec<FieldId>),
    /// `minuend - subtrahend`
    Difference { minuend: FieldId, subtrahend: FieldId },
    /// Hours between two clock times, crossing midnight when negative
    ClockHours { start: FieldId, end: FieldId },
    /// `base_distance * base_rate + max(0, distance - base_distance) * excess_rate`
    Tiered {
        distance: FieldId,
        base_distance: FieldId,
        base_rate: FieldId,
        excess_rate: FieldId,
    },
    /// `100 * part / whole`, blank when the whole is blank or zero
    Percentage { part: FieldId, whole: FieldId },
    /// Formula picked by the text value of a selector field
    ByCategory {
        selector: FieldId,
        arms: Vec<(String, Formula)>,
        fallback: Option<Box<Formula>>,
    },
}

impl Formula {
    /// Every field this formula may read.
    pub fn references(&self) -> Vec<&FieldId> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a FieldId>) {
        match self {
            Formula::Sum(ids) | Formula::Product(ids) => refs.extend(ids.iter()),
            Formula::Difference { minuend, subtrahend } => refs.extend([minuend, subtrahend]),
            Formula::ClockHours { start, end } => refs.extend([start, end]),
            Formula::Tiered {
                distance,
                base_distance,
                base_rate,
                excess_rate,
            } => refs.extend([distance, base_distance, base_rate, excess_rate]),
            Formula::Percentage { part, whole } => refs.extend([part, whole]),
            Formula::ByCategory {
                selector,
                arms,
                fallback,
            } => {
                refs.push(selector);
                for (_, arm) in arms {
                    arm.collect_references(refs);
                }
                if let Some(fallback) = fallback {
                    fallback.collect_references(refs);
                }
            }
        }
    }

    /// Evaluate against the store. `None` means the result is blank.
    pub fn evaluate(&self, store: &FieldStore, nulls: NullPolicy) -> Option<f64> {
        let number = |id: &FieldId| store.get(id.as_str()).as_number();
        let clock = |id: &FieldId| store.get(id.as_str()).as_time();

        match self {
            Formula::Sum(ids) => fold(ids, store, nulls, 0.0, |acc, v| acc + v),
            Formula::Product(ids) => fold(ids, store, nulls, 1.0, |acc, v| acc * v),
            Formula::Difference {
                minuend,
                subtrahend,
            } => Some(number(minuend)? - number(subtrahend)?),
            Formula::ClockHours { start, end } => Some(clock(start)?.hours_until(clock(end)?)),
            Formula::Tiered {
                distance,
                base_distance,
                base_rate,
                excess_rate,
            } => {
                let base = number(base_distance)?;
                let base_amount = base * number(base_rate)?;
                let excess = (number(distance)? - base).max(0.0);
                if excess > 0.0 {
                    Some(base_amount + excess * number(excess_rate)?)
                } else {
                    Some(base_amount)
                }
            }
            Formula::Percentage { part, whole } => {
                let whole = number(whole)?;
                if whole == 0.0 {
                    return None;
                }
                Some(100.0 * number(part)? / whole)
            }
            Formula::ByCategory {
                selector,
                arms,
                fallback,
            } => {
                let category = store.get(selector.as_str()).as_text()?.trim();
                match arms
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(category))
                {
                    Some((_, arm)) => arm.evaluate(store, nulls),
                    None => fallback.as_ref()?.evaluate(store, nulls),
                }
            }
        }
    }
}

fn fold(
    ids: &[FieldId],
    store: &FieldStore,
    nulls: NullPolicy,
    init: f64,
    op: impl Fn(f64, f64) -> f64,
) -> Option<f64> {
    let mut acc = init;
    let mut seen = false;
    for id in ids {
        match store.get(id.as_str()).as_number() {
            Some(v) => {
                acc = op(acc, v);
                seen = true;
            }
            None if nulls == NullPolicy::Propagate => return None,
            None => {}
        }
    }
    seen.then_some(acc)
}

/// Declaration of one derived field.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFieldSpec {
    /// Field written by this spec
    pub id: FieldId,
    /// Direct sources, in declaration order
    pub sources: Vec<FieldId>,
    /// Pure formula
    pub formula: Formula,
    /// Rounding applied at computation time
    pub rounding: Rounding,
    /// Treatment of blank operands
    pub nulls: NullPolicy,
}

impl DerivedFieldSpec {
    /// Create a spec whose sources are exactly the fields the formula reads.
    pub fn new(id: impl Into<FieldId>, formula: Formula) -> Self {
        let mut sources: Vec<FieldId> = Vec::new();
        for source in formula.references() {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
        Self {
            id: id.into(),
            sources,
            formula,
            rounding: Rounding::Exact,
            nulls: NullPolicy::Propagate,
        }
    }

    /// Declare the sources explicitly.
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FieldId>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Round to two decimal places.
    pub fn in_cents(mut self) -> Self {
        self.rounding = Rounding::CENTS;
        self
    }

    pub fn with_rounding(mut self, rounding: Rounding) -> Self {
        self.rounding = rounding;
        self
    }

    /// Leave blank operands out of sums and products.
    pub fn skip_blanks(mut self) -> Self {
        self.nulls = NullPolicy::SkipBlanks;
        self
    }

    /// Compute the value this field should hold.
    pub fn compute(&self, store: &FieldStore) -> FieldValue {
        self.formula
            .evaluate(store, self.nulls)
            .filter(|v| v.is_finite())
            .map(|v| FieldValue::Number(self.rounding.apply(v)))
            .unwrap_or(FieldValue::Blank)
    }
}

/// Static DAG of derived fields for one form type.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Specs in topological order
    specs: Vec<DerivedFieldSpec>,
    /// Derived id -> position in `specs`
    position: HashMap<FieldId, usize>,
    /// Field -> topologically ordered positions of everything downstream
    downstream: HashMap<FieldId, Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicates, undeclared reads and cycles.
    pub fn new(specs: Vec<DerivedFieldSpec>) -> Result<Self, GraphError> {
        let mut by_id: HashMap<FieldId, DerivedFieldSpec> = HashMap::new();
        let mut declared: Vec<FieldId> = Vec::new();

        for spec in specs {
            for input in spec.formula.references() {
                if !spec.sources.contains(input) {
                    return Err(GraphError::UndeclaredSource {
                        field: spec.id.clone(),
                        input: input.clone(),
                    });
                }
            }
            if by_id.contains_key(&spec.id) {
                return Err(GraphError::Duplicate(spec.id));
            }
            declared.push(spec.id.clone());
            by_id.insert(spec.id.clone(), spec);
        }

        let order = topological_order(&declared, &by_id)?;

        let mut specs = Vec::with_capacity(order.len());
        let mut position = HashMap::new();
        for id in order {
            if let Some(spec) = by_id.remove(&id) {
                position.insert(id, specs.len());
                specs.push(spec);
            }
        }

        let downstream = downstream_closures(&specs);

        Ok(Self {
            specs,
            position,
            downstream,
        })
    }

    /// Specs in topological order.
    pub fn specs(&self) -> &[DerivedFieldSpec] {
        &self.specs
    }

    pub fn spec(&self, id: &str) -> Option<&DerivedFieldSpec> {
        self.position.get(id).map(|&i| &self.specs[i])
    }

    pub fn is_derived(&self, id: &str) -> bool {
        self.position.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Derived fields transitively depending on `id`, in topological order.
    pub fn downstream(&self, id: &str) -> impl Iterator<Item = &DerivedFieldSpec> {
        self.downstream_positions(id)
            .iter()
            .map(move |&i| &self.specs[i])
    }

    pub(crate) fn downstream_positions(&self, id: &str) -> &[usize] {
        self.downstream.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn spec_at(&self, position: usize) -> &DerivedFieldSpec {
        &self.specs[position]
    }
}

/// Depth-first topological sort; sources come before their dependents.
fn topological_order(
    declared: &[FieldId],
    by_id: &HashMap<FieldId, DerivedFieldSpec>,
) -> Result<Vec<FieldId>, GraphError> {
    let mut sorted = Vec::with_capacity(declared.len());
    let mut visited = HashSet::new();
    let mut in_progress = HashSet::new();

    for id in declared {
        visit(id, by_id, &mut visited, &mut in_progress, &mut sorted)?;
    }
    Ok(sorted)
}

fn visit(
    id: &FieldId,
    by_id: &HashMap<FieldId, DerivedFieldSpec>,
    visited: &mut HashSet<FieldId>,
    in_progress: &mut HashSet<FieldId>,
    sorted: &mut Vec<FieldId>,
) -> Result<(), GraphError> {
    if in_progress.contains(id) {
        return Err(GraphError::CycleDetected(id.clone()));
    }
    if visited.contains(id) {
        return Ok(());
    }
    // Raw inputs are leaves
    let Some(spec) = by_id.get(id) else {
        return Ok(());
    };

    in_progress.insert(id.clone());
    for source in &spec.sources {
        visit(source, by_id, visited, in_progress, sorted)?;
    }
    in_progress.remove(id);

    visited.insert(id.clone());
    sorted.push(id.clone());
    Ok(())
}

fn downstream_closures(specs: &[DerivedFieldSpec]) -> HashMap<FieldId, Vec<usize>> {
    let mut dependents: HashMap<&FieldId, Vec<usize>> = HashMap::new();
    for (i, spec) in specs.iter().enumerate() {
        for source in &spec.sources {
            dependents.entry(source).or_default().push(i);
        }
    }

    let mut closures = HashMap::new();
    for &root in dependents.keys() {
        let mut reached = BTreeSet::new();
        let mut stack: Vec<usize> = dependents[root].clone();
        while let Some(i) = stack.pop() {
            if reached.insert(i) {
                if let Some(next) = dependents.get(&specs[i].id) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        // Positions already follow topological order
        closures.insert(root.clone(), reached.into_iter().collect());
    }
    closures
}

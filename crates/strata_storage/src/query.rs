//! Select queries: include lists, predicate filters, and ordering.
//!
//! Filters are compiled once per distinct shape into a [`CompiledFilter`] that
//! resolves only the referenced columns of each archetype and stops at the
//! first failing clause. The store caches compiled filters by signature.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use strata_foundation::{Entity, Name, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::archetype::Archetype;
use crate::column::Column;

/// Comparison operator for a filter clause.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Comparison {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    /// Evaluates `left <op> right`.
    ///
    /// Numbers compare across int and float. Ordering comparisons between
    /// incomparable values are false.
    #[must_use]
    pub fn eval(self, left: &Value, right: &Value) -> bool {
        let ordering = left.partial_cmp(right);
        let equal = left == right || ordering == Some(Ordering::Equal);
        match self {
            Self::Eq => equal,
            Self::Ne => !equal,
            Self::Lt => ordering == Some(Ordering::Less),
            Self::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Self::Gt => ordering == Some(Ordering::Greater),
            Self::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Sort direction for an order key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// One `component <op> value` clause.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Filter {
    /// Component read by the clause.
    pub component: Name,
    /// Comparison operator.
    pub comparison: Comparison,
    /// Right-hand operand.
    pub value: Value,
}

/// A select query over the store.
///
/// Matches entities whose archetype has every included and filtered
/// component and whose values pass every filter. Results are ordered by the
/// order keys, then by entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Query {
    include: Vec<Name>,
    filters: Vec<Filter>,
    order: Vec<(Name, Direction)>,
}

impl Query {
    /// Creates a query requiring the given components.
    pub fn new<I, N>(include: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Name>,
    {
        let mut include: Vec<Name> = include.into_iter().map(Into::into).collect();
        include.sort();
        include.dedup();
        Self {
            include,
            filters: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Adds a filter clause.
    #[must_use]
    pub fn filter(
        mut self,
        component: impl Into<Name>,
        comparison: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter {
            component: component.into(),
            comparison,
            value: value.into(),
        });
        self
    }

    /// Adds an order key. Earlier keys take precedence.
    #[must_use]
    pub fn order_by(mut self, component: impl Into<Name>, direction: Direction) -> Self {
        self.order.push((component.into(), direction));
        self
    }

    /// Returns the included components.
    #[must_use]
    pub fn include(&self) -> &[Name] {
        &self.include
    }

    /// Returns the filter clauses.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns the order keys.
    #[must_use]
    pub fn order(&self) -> &[(Name, Direction)] {
        &self.order
    }

    /// Components an archetype must have to be scanned.
    pub fn required(&self) -> impl Iterator<Item = &Name> {
        self.include
            .iter()
            .chain(self.filters.iter().map(|f| &f.component))
    }

    /// Every column the query reads.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<Name> {
        self.required()
            .chain(self.order.iter().map(|(name, _)| name))
            .cloned()
            .collect()
    }

    /// Checks if an archetype can hold matching rows.
    #[must_use]
    pub fn matches_archetype(&self, archetype: &Archetype) -> bool {
        archetype.components().contains_all(self.required())
    }

    /// Structural key: equal for equivalent queries.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{:?}|{}|{:?}", self.include, self.filter_signature(), self.order)
    }

    /// Structural key of the filter clauses alone.
    #[must_use]
    pub fn filter_signature(&self) -> String {
        format!("{:?}", self.filters)
    }

    /// Sorts matched entities by the order keys, then by entity.
    ///
    /// `keys` yields each entity's order values, aligned with the order keys.
    /// Entities missing a key sort before those that have it.
    pub(crate) fn sort(&self, rows: &mut [(Entity, Vec<Option<Value>>)]) {
        rows.sort_by(|(a, a_keys), (b, b_keys)| {
            for ((_, direction), (left, right)) in
                self.order.iter().zip(a_keys.iter().zip(b_keys.iter()))
            {
                let ordering = match (left, right) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(l), Some(r)) => {
                        let ordering = l.partial_cmp(r).unwrap_or(Ordering::Equal);
                        match direction {
                            Direction::Asc => ordering,
                            Direction::Desc => ordering.reverse(),
                        }
                    }
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.cmp(b)
        });
    }
}

/// Row predicate compiled from a query's filter clauses.
#[derive(Clone, Debug, Default)]
pub struct CompiledFilter {
    clauses: Vec<Filter>,
}

impl CompiledFilter {
    /// Compiles a query's filters.
    #[must_use]
    pub fn compile(query: &Query) -> Self {
        Self {
            clauses: query.filters.clone(),
        }
    }

    /// Returns true if there is nothing to test.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Resolves the referenced columns of one archetype into a row predicate.
    ///
    /// Returns `None` if the archetype lacks a filtered component, in which
    /// case no row can match.
    pub fn bind<'a>(&'a self, archetype: &'a Archetype) -> Option<impl Fn(usize) -> bool + 'a> {
        let bound: Vec<(&Column, &Filter)> = self
            .clauses
            .iter()
            .map(|clause| archetype.column(&clause.component).map(|column| (column, clause)))
            .collect::<Option<_>>()?;
        Some(move |row: usize| {
            bound.iter().all(|(column, clause)| {
                column
                    .get(row)
                    .is_some_and(|value| clause.comparison.eval(&value, &clause.value))
            })
        })
    }
}

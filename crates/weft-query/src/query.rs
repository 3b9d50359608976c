//! Query descriptions.

use std::fmt;
use std::sync::Arc;

use weft_common::types::{Key, Scope};
use weft_storage::{CursorParams, Direction, KeyRange};

use crate::error::{QueryError, QueryResult};
use crate::join::SolverFactory;

/// One participant of a query: a store or index, a key range and a
/// direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorSpec {
    /// Cursor parameters the participant is opened with.
    pub params: CursorParams,
}

impl IteratorSpec {
    /// Iterates a store by primary key.
    pub fn store(store: impl Into<String>) -> Self {
        Self {
            params: CursorParams::store(store),
        }
    }

    /// Iterates an index of a store.
    pub fn index(store: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            params: CursorParams::store(store).index(index),
        }
    }

    /// Sets the key range.
    #[must_use]
    pub fn range(mut self, range: KeyRange) -> Self {
        self.params = self.params.range(range);
        self
    }

    /// Restricts the participant to a single key.
    #[must_use]
    pub fn only(self, key: Key) -> Self {
        self.range(KeyRange::only(key))
    }

    /// Iterates in descending order.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.params = self.params.reverse();
        self
    }

    /// Skips loading record values.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.params = self.params.keys_only(true);
        self
    }

    /// Returns the store name.
    pub fn store_name(&self) -> &str {
        &self.params.store
    }

    /// Returns the direction.
    pub fn direction(&self) -> Direction {
        self.params.direction
    }
}

impl From<CursorParams> for IteratorSpec {
    fn from(params: CursorParams) -> Self {
        Self { params }
    }
}

/// How the participants of a query are combined.
#[derive(Clone, Default)]
pub enum CombineRule {
    /// Keys present in every participant, found with a zig-zag merge.
    #[default]
    Intersect,
    /// Outer primary keys that every other participant has, found by
    /// probing.
    CrossProbe,
    /// A caller-selected strategy.
    Custom(Arc<dyn SolverFactory>),
}

impl CombineRule {
    /// Returns the rule name, for logs.
    pub fn name(&self) -> &str {
        match self {
            CombineRule::Intersect => "intersect",
            CombineRule::CrossProbe => "cross_probe",
            CombineRule::Custom(factory) => factory.name(),
        }
    }
}

impl fmt::Debug for CombineRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombineRule::Intersect => f.write_str("Intersect"),
            CombineRule::CrossProbe => f.write_str("CrossProbe"),
            CombineRule::Custom(factory) => f.debug_tuple("Custom").field(&factory.name()).finish(),
        }
    }
}

/// A query: participants, how to combine them, and which slice of the
/// result to return.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Participants, in order. The first one is the outer side of a
    /// cross-probe and supplies row values.
    pub iterators: Vec<IteratorSpec>,
    /// Combination rule.
    pub rule: CombineRule,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Number of leading rows to skip.
    pub offset: usize,
}

impl QuerySpec {
    /// Creates an empty query combined with `rule`.
    pub fn new(rule: CombineRule) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    /// Creates a single-participant query.
    pub fn scan(iterator: IteratorSpec) -> Self {
        Self::new(CombineRule::Intersect).iterator(iterator)
    }

    /// Creates an intersection over `iterators`.
    pub fn intersect(iterators: impl IntoIterator<Item = IteratorSpec>) -> Self {
        Self {
            iterators: iterators.into_iter().collect(),
            ..Self::new(CombineRule::Intersect)
        }
    }

    /// Creates a cross-probe of `outer` against `inners`.
    pub fn cross_probe(
        outer: IteratorSpec,
        inners: impl IntoIterator<Item = IteratorSpec>,
    ) -> Self {
        let mut iterators = vec![outer];
        iterators.extend(inners);
        Self {
            iterators,
            ..Self::new(CombineRule::CrossProbe)
        }
    }

    /// Adds a participant.
    #[must_use]
    pub fn iterator(mut self, iterator: IteratorSpec) -> Self {
        self.iterators.push(iterator);
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Checks that the query can be executed.
    pub fn validate(&self) -> QueryResult<()> {
        let Some(first) = self.iterators.first() else {
            return Err(QueryError::invalid("query has no iterators"));
        };
        if let Some(it) = self.iterators.iter().find(|it| it.store_name().is_empty()) {
            return Err(QueryError::invalid(format!(
                "iterator {} names no store",
                it.params
            )));
        }
        if matches!(self.rule, CombineRule::Intersect)
            && self
                .iterators
                .iter()
                .any(|it| it.direction() != first.direction())
        {
            return Err(QueryError::invalid(
                "intersect requires every iterator to share a direction",
            ));
        }
        if self.limit == Some(0) {
            return Err(QueryError::invalid("limit must be positive"));
        }
        Ok(())
    }

    /// Returns the read-only scope covering every participant.
    pub fn scope(&self) -> Scope {
        Scope::read_only(self.iterators.iter().map(|it| it.store_name().to_string()))
    }
}

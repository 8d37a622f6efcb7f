// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Query model: a projection plus a filter expression.
//!
//! Besides the types themselves this module answers the two questions the
//! plan selector asks of every query: which attribute sets does it touch,
//! and does it pin the time attribute to an instant or a range.

use crate::schema::AttributeNameSet;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    #[default]
    All,
    Names(Vec<String>),
}

impl Projection {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Projection::Names(names) if names.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    #[must_use]
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    #[default]
    Include,
    Compare {
        attribute: String,
        op: CompareOp,
        value: Value,
    },
    /// Inclusive on both ends
    Between {
        attribute: String,
        lower: Value,
        upper: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(attribute: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::compare(attribute, CompareOp::Eq, value)
    }

    pub fn between(
        attribute: impl Into<String>,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> Self {
        Filter::Between {
            attribute: attribute.into(),
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Conjunction, flattening `Include`
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::Include, f) | (f, Filter::Include) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    /// Every attribute name the expression refers to
    #[must_use]
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Include => {}
            Filter::Compare { attribute, .. } | Filter::Between { attribute, .. } => {
                out.push(attribute)
            }
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.collect_attributes(out);
                }
            }
            Filter::Not(inner) => inner.collect_attributes(out),
        }
    }

    #[must_use]
    pub fn references_any(&self, names: &AttributeNameSet) -> bool {
        self.attributes().into_iter().any(|a| names.contains(a))
    }

    /// Drop every clause that mentions an attribute outside `names`.
    ///
    /// The result selects a superset of what `self` selects: removed
    /// conjuncts become `Include`, and a disjunction or negation that
    /// mentions a foreign attribute is removed whole.
    #[must_use]
    pub fn restrict_to(&self, names: &AttributeNameSet) -> Filter {
        let is_local = |f: &Filter| f.attributes().into_iter().all(|a| names.contains(a));
        match self {
            Filter::Include => Filter::Include,
            Filter::Compare { .. } | Filter::Between { .. } | Filter::Or(_) | Filter::Not(_) => {
                if is_local(self) {
                    self.clone()
                } else {
                    Filter::Include
                }
            }
            Filter::And(children) => children
                .iter()
                .map(|c| c.restrict_to(names))
                .fold(Filter::Include, Filter::and),
        }
    }

    /// Evaluate against a row. Comparisons against a missing or null
    /// attribute are false.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        match self {
            Filter::Include => true,
            Filter::Compare {
                attribute,
                op,
                value,
            } => lookup(attribute)
                .and_then(|v| v.compare(value))
                .is_some_and(|ordering| op.accepts(ordering)),
            Filter::Between {
                attribute,
                lower,
                upper,
            } => lookup(attribute).is_some_and(|v| {
                v.compare(lower).is_some_and(|o| o != Ordering::Less)
                    && v.compare(upper).is_some_and(|o| o != Ordering::Greater)
            }),
            Filter::And(children) => children.iter().all(|c| c.evaluate(lookup)),
            Filter::Or(children) => children.iter().any(|c| c.evaluate(lookup)),
            Filter::Not(inner) => !inner.evaluate(lookup),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub projection: Projection,
    pub filter: Filter,
}

impl Query {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    pub fn select<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            projection: Projection::Names(names.into_iter().map(Into::into).collect()),
            filter: Filter::Include,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// True iff the query projects everything, projects a name in `names`, or
/// filters on a name in `names`
#[must_use]
pub fn requires_attributes(query: &Query, names: &AttributeNameSet) -> bool {
    match &query.projection {
        Projection::All => return true,
        Projection::Names(projected) => {
            if projected.iter().any(|n| names.contains(n)) {
                return true;
            }
        }
    }
    query.filter.references_any(names)
}

/// A range over instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub start: Bound<DateTime<Utc>>,
    pub end: Bound<DateTime<Utc>>,
}

impl Default for TimeBounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl TimeBounds {
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            start: Bound::Included(instant),
            end: Bound::Included(instant),
        }
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        matches!((self.start, self.end), (Bound::Unbounded, Bound::Unbounded))
    }

    #[must_use]
    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        let after_start = match self.start {
            Bound::Included(s) => *instant >= s,
            Bound::Excluded(s) => *instant > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => *instant <= e,
            Bound::Excluded(e) => *instant < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }

    /// The single instant a closed range of zero width pins down
    #[must_use]
    pub fn point(&self) -> Option<DateTime<Utc>> {
        match (self.start, self.end) {
            (Bound::Included(s), Bound::Included(e)) if s == e => Some(s),
            _ => None,
        }
    }

    fn tighten_start(&mut self, bound: Bound<DateTime<Utc>>) {
        self.start = match (self.start, bound) {
            (Bound::Unbounded, b) | (b, Bound::Unbounded) => b,
            (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y)),
            (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y)),
            (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
                if e >= i {
                    Bound::Excluded(e)
                } else {
                    Bound::Included(i)
                }
            }
        };
    }

    fn tighten_end(&mut self, bound: Bound<DateTime<Utc>>) {
        self.end = match (self.end, bound) {
            (Bound::Unbounded, b) | (b, Bound::Unbounded) => b,
            (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y)),
            (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y)),
            (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
                if e <= i {
                    Bound::Excluded(e)
                } else {
                    Bound::Included(i)
                }
            }
        };
    }
}

/// Instant the filter pins `time_attribute` to: an equality comparison, a
/// zero-width `Between`, or conjoined bounds that meet at one point.
/// `None` is a normal outcome.
#[must_use]
pub fn extract_timestamp(filter: &Filter, time_attribute: &str) -> Option<DateTime<Utc>> {
    extract_time_bounds(filter, time_attribute).point()
}

/// Range the filter's top-level conjunction imposes on `time_attribute`.
/// Constraints under `Or` or `Not` are ignored, which only widens the range.
#[must_use]
pub fn extract_time_bounds(filter: &Filter, time_attribute: &str) -> TimeBounds {
    let mut bounds = TimeBounds::unbounded();
    collect_time_bounds(filter, time_attribute, &mut bounds);
    bounds
}

fn collect_time_bounds(filter: &Filter, time_attribute: &str, bounds: &mut TimeBounds) {
    match filter {
        Filter::Compare {
            attribute,
            op,
            value,
        } if attribute.eq_ignore_ascii_case(time_attribute) => {
            let Some(t) = value.to_timestamp() else {
                return;
            };
            match op {
                CompareOp::Eq => {
                    bounds.tighten_start(Bound::Included(t));
                    bounds.tighten_end(Bound::Included(t));
                }
                CompareOp::Gt => bounds.tighten_start(Bound::Excluded(t)),
                CompareOp::GtEq => bounds.tighten_start(Bound::Included(t)),
                CompareOp::Lt => bounds.tighten_end(Bound::Excluded(t)),
                CompareOp::LtEq => bounds.tighten_end(Bound::Included(t)),
                CompareOp::NotEq => {}
            }
        }
        Filter::Between {
            attribute,
            lower,
            upper,
        } if attribute.eq_ignore_ascii_case(time_attribute) => {
            if let Some(t) = lower.to_timestamp() {
                bounds.tighten_start(Bound::Included(t));
            }
            if let Some(t) = upper.to_timestamp() {
                bounds.tighten_end(Bound::Included(t));
            }
        }
        Filter::And(children) => {
            for child in children {
                collect_time_bounds(child, time_attribute, bounds);
            }
        }
        _ => {}
    }
}

// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test-name filtering.
//!
//! A [`TestFilter`] is an ordered list of include/exclude clauses applied to
//! whole test names. Pattern expansion (wildcards, sub-test selection) is
//! the business of the test-execution adapter inside the worker; at this
//! layer, matching is by exact name, and per-test pattern sets are opaque
//! strings transported to the adapter.

use regatta_metadata::TestId;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// One include or exclude clause of a [`TestFilter`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pattern: SmolStr,
    include: bool,
}

impl FilterClause {
    /// Creates a clause that includes the named test.
    pub fn include(pattern: impl Into<SmolStr>) -> Self {
        Self {
            pattern: pattern.into(),
            include: true,
        }
    }

    /// Creates a clause that excludes the named test.
    pub fn exclude(pattern: impl Into<SmolStr>) -> Self {
        Self {
            pattern: pattern.into(),
            include: false,
        }
    }

    /// The clause's pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether this is an include clause.
    pub fn is_include(&self) -> bool {
        self.include
    }
}

/// An inclusion/exclusion predicate over test names.
///
/// Exclude clauses always veto. If at least one include clause is present,
/// a name must match one of them; with no include clauses, every
/// non-excluded name is accepted.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestFilter {
    clauses: Vec<FilterClause>,
}

impl TestFilter {
    /// A filter that accepts every test.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a filter from an ordered clause list.
    pub fn new(clauses: Vec<FilterClause>) -> Self {
        Self { clauses }
    }

    /// Returns true if the filter has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The ordered clauses.
    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Applies the predicate to a test name.
    pub fn matches(&self, test: &TestId) -> bool {
        let mut has_includes = false;
        let mut included = false;
        for clause in &self.clauses {
            let matched = clause.pattern == test.as_str();
            if clause.include {
                has_includes = true;
                included |= matched;
            } else if matched {
                return false;
            }
        }
        !has_includes || included
    }
}

/// Patterns restricting which test cases run within one named test.
///
/// Resolved per test name by
/// [`RunSpec::resolve_test_filter`](crate::runspec::RunSpec::resolve_test_filter)
/// and handed to the execution adapter untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterPatterns(Vec<SmolStr>);

impl FilterPatterns {
    /// Creates a pattern set.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<SmolStr>>) -> Self {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    /// Returns true if there are no patterns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the patterns.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(SmolStr::as_str)
    }
}

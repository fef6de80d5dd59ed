//! Best-opportunity selection over freshly fetched candidates.
//!
//! Provides the selection policy shared by every strategy family: rank candidates by yield
//! (default) or by available liquidity and return the single best one.
//!
//! Typical usage:
//! let best = select_best(candidates, SelectionCriterion::HighestYield)?;
//!
//! Notes:
//! - Candidates with a non-finite apy or liquidity are never selected.
//! - Ties are broken by the other metric, then by the lexicographically smallest id, so the
//!   result does not depend on input order.
//! - Candidates are built per cycle and never cached.

use std::cmp::Ordering;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no eligible candidates")]
    NoCandidates,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<T> {
    pub id: String,
    /// Annual yield in percent.
    pub apy: f64,
    /// Available liquidity in quote units (USD for every current source).
    pub liquidity: f64,
    pub payload: T,
}

impl<T> Candidate<T> {
    pub fn new(id: impl Into<String>, apy: f64, liquidity: f64, payload: T) -> Self {
        Self {
            id: id.into(),
            apy,
            liquidity,
            payload,
        }
    }

    fn is_eligible(&self) -> bool {
        self.apy.is_finite() && self.liquidity.is_finite()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    #[default]
    HighestYield,
    DeepestLiquidity,
}

/// Ordering where `Less` means "better".
fn compare<T>(a: &Candidate<T>, b: &Candidate<T>, criterion: SelectionCriterion) -> Ordering {
    let (primary, secondary) = match criterion {
        SelectionCriterion::HighestYield => (
            b.apy.total_cmp(&a.apy),
            b.liquidity.total_cmp(&a.liquidity),
        ),
        SelectionCriterion::DeepestLiquidity => (
            b.liquidity.total_cmp(&a.liquidity),
            b.apy.total_cmp(&a.apy),
        ),
    };
    primary.then(secondary).then_with(|| a.id.cmp(&b.id))
}

/// Pick the best candidate under `criterion`.
pub fn select_best<T>(
    candidates: Vec<Candidate<T>>,
    criterion: SelectionCriterion,
) -> Result<Candidate<T>, SelectionError> {
    candidates
        .into_iter()
        .filter(Candidate::is_eligible)
        .min_by(|a, b| compare(a, b, criterion))
        .ok_or(SelectionError::NoCandidates)
}

/// All eligible candidates, best first. Used for progress reporting.
pub fn rank<T>(mut candidates: Vec<Candidate<T>>, criterion: SelectionCriterion) -> Vec<Candidate<T>> {
    candidates.retain(Candidate::is_eligible);
    candidates.sort_by(|a, b| compare(a, b, criterion));
    candidates
}

//! Consensus over the estimates of a finished round

use std::collections::BTreeMap;

use crate::models::{NO_ESTIMATE, UNSURE_ESTIMATE};
use crate::{Error, Result};

/// Compute the tally of a round.
///
/// Blank and unsure estimates are skipped. The most frequent value wins; a tie
/// collapses to `"<lowest> - <highest>"` over the tied values, dropping the
/// ones in between. With nothing numeric left the result is `"?"`.
pub fn tally<S: AsRef<str>>(estimates: &[S]) -> Result<String> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();

    for estimate in estimates {
        let estimate = estimate.as_ref();
        if estimate == NO_ESTIMATE || estimate == UNSURE_ESTIMATE {
            continue;
        }
        let value: i64 = estimate
            .parse()
            .map_err(|_| Error::InvalidEstimate(estimate.to_string()))?;
        *counts.entry(value).or_default() += 1;
    }

    let Some(max) = counts.values().copied().max() else {
        return Ok(UNSURE_ESTIMATE.to_string());
    };

    // BTreeMap iterates in ascending key order
    let tied: Vec<i64> = counts
        .into_iter()
        .filter(|&(_, count)| count == max)
        .map(|(value, _)| value)
        .collect();

    Ok(match tied.as_slice() {
        [only] => only.to_string(),
        [lowest, .., highest] => format!("{lowest} - {highest}"),
        [] => UNSURE_ESTIMATE.to_string(),
    })
}

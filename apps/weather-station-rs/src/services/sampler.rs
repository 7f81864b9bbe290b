//! Fixed-stride downsampling.
//!
//! Given `N` ordered records and a cap of `max_points`, the stride is
//! `ceil(N / max_points)` and every record whose zero-based index is a
//! multiple of the stride is kept. The first record is always kept and the
//! output length is `ceil(N / stride)`.
//!
//! Ceiling rounding means the output can be shorter than `max_points` even
//! when `N > max_points` (for example `N = 5`, `max_points = 4` gives stride 2
//! and three points). That shortfall is part of the contract: clients treat
//! `max_points` as an upper bound, not a target.

use crate::error::SeriesError;

/// Skip interval for `total` records capped at `max_points`. Never zero.
pub fn stride_for(total: usize, max_points: usize) -> Result<usize, SeriesError> {
    if max_points == 0 {
        return Err(SeriesError::InvalidArgument(
            "max_points must be greater than zero".to_string(),
        ));
    }
    Ok(total.div_ceil(max_points).max(1))
}

/// Number of records [`sample`] returns for `total` inputs.
pub fn sampled_len(total: usize, max_points: usize) -> Result<usize, SeriesError> {
    let stride = stride_for(total, max_points)?;
    Ok(total.div_ceil(stride))
}

/// Keeps every `stride`-th record, starting with the first.
///
/// Records are moved, not cloned, and are never inspected, so sentinel values
/// from the source (NaN and friends) pass through untouched.
pub fn sample<T>(records: Vec<T>, max_points: usize) -> Result<Vec<T>, SeriesError> {
    let stride = stride_for(records.len(), max_points)?;
    if stride == 1 {
        return Ok(records);
    }
    Ok(records.into_iter().step_by(stride).collect())
}

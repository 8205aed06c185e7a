//! Round-robin reviewer selection.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which rotation a reviewer is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Non-committer reviewers, used for the first review.
    Members,
    /// Committers, used to escalate an approved pull request.
    Committers,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Members => f.write_str("members"),
            PoolKind::Committers => f.write_str("committers"),
        }
    }
}

/// Exclusive upper bound of the random starting cursor.
const SEED_RANGE: usize = 100;

/// One rotation cursor per pool.
///
/// Cursors live for the lifetime of the process so that load spreads evenly
/// across the sequence of pull requests, not per pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cursors {
    pub members: usize,
    pub committers: usize,
}

impl Cursors {
    pub fn new(members: usize, committers: usize) -> Self {
        Self {
            members,
            committers,
        }
    }

    /// Start both rotations at a random offset, so restarts don't always
    /// hand the first pull request to the same person.
    pub fn seeded() -> Self {
        let mut rng = rand::thread_rng();
        Self::new(rng.gen_range(0..SEED_RANGE), rng.gen_range(0..SEED_RANGE))
    }

    pub fn get_mut(&mut self, kind: PoolKind) -> &mut usize {
        match kind {
            PoolKind::Members => &mut self.members,
            PoolKind::Committers => &mut self.committers,
        }
    }
}

/// Pick the next reviewer from `pool`, skipping `exclude`.
///
/// The cursor is advanced before each look, so a cursor of 5 over a pool of
/// two starts at index 0. At most `pool.len()` candidates are considered.
/// Returns `None` for an empty pool or when every candidate is `exclude`.
pub fn choose_reviewer<S: AsRef<str>>(
    pool: &[S],
    cursor: &mut usize,
    exclude: &str,
) -> Option<String> {
    for _ in 0..pool.len() {
        *cursor = cursor.wrapping_add(1);
        let candidate = pool[*cursor % pool.len()].as_ref();
        if candidate != exclude {
            return Some(candidate.to_string());
        }
    }
    None
}

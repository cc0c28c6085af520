//! Size metrics used to enforce the history budget.
//!
//! Neither estimator matches a real model tokenizer. `CharCount` is exact
//! in characters; `TokenApprox` assumes roughly four characters per token,
//! which overestimates for CJK-heavy text on some tokenizers and
//! underestimates on others. Budgets should leave headroom accordingly.

use crate::message::Turn;

/// Per-turn cost added by `TokenApprox` for role and framing tokens.
pub const TOKEN_OVERHEAD_PER_TURN: usize = 4;

/// Approximate size of a turn.
pub trait SizeEstimator: Send + Sync {
    fn turn_size(&self, turn: &Turn) -> usize;

    fn total(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.turn_size(t)).sum()
    }
}

/// Unicode scalar count of the turn text.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCount;

impl SizeEstimator for CharCount {
    fn turn_size(&self, turn: &Turn) -> usize {
        turn.text.chars().count()
    }
}

/// `ceil(chars / 4)` plus a fixed per-turn overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenApprox;

impl SizeEstimator for TokenApprox {
    fn turn_size(&self, turn: &Turn) -> usize {
        turn.text.chars().count().div_ceil(4) + TOKEN_OVERHEAD_PER_TURN
    }
}

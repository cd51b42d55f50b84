use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::lock;

/// Per-session escalation ledger.
///
/// Tracks what each session has spent on cloud escalations and refuses a
/// charge that would push it over either the cent or the token cap.
#[derive(Debug)]
pub struct SessionBudget {
    max_cents: f64,
    max_tokens: u32,
    spent: Mutex<HashMap<String, Spend>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Spend {
    cents: f64,
    tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub cents_remaining: f64,
    pub tokens_remaining: i64,
    pub is_exhausted: bool,
}

impl SessionBudget {
    pub fn new(max_cents: f64, max_tokens: u32) -> Self {
        Self {
            max_cents,
            max_tokens,
            spent: Mutex::new(HashMap::new()),
        }
    }

    /// Charges `cents`/`tokens` to `session_id` if both stay within the caps.
    /// Check and charge happen under one lock.
    pub fn try_charge(&self, session_id: &str, cents: f64, tokens: u32) -> bool {
        let mut spent = lock(&self.spent);
        let entry = spent.entry(session_id.to_string()).or_default();
        let next_cents = entry.cents + cents;
        let next_tokens = entry.tokens.saturating_add(tokens);
        // small epsilon so 25 x 0.02 still fits in 0.5
        if next_cents > self.max_cents + 1e-9 || next_tokens > self.max_tokens {
            return false;
        }
        entry.cents = next_cents;
        entry.tokens = next_tokens;
        true
    }

    pub fn check_status(&self, session_id: &str) -> BudgetStatus {
        let spend = lock(&self.spent).get(session_id).copied().unwrap_or_default();
        let cents_remaining = self.max_cents - spend.cents;
        let tokens_remaining = self.max_tokens as i64 - spend.tokens as i64;
        BudgetStatus {
            cents_remaining,
            tokens_remaining,
            is_exhausted: cents_remaining <= 1e-9 || tokens_remaining <= 0,
        }
    }
}

//! Versioned snapshots of the allocation ledger.

use std::collections::{HashMap, HashSet};

pub type ViewToken = u64;

/// The well-known token of the system (authoritative) view.
pub const SYSTEM_VIEW: ViewToken = 0;

/// One applicant's booked quantity against one concrete resource path.
#[derive(Debug, Clone, Default)]
pub struct ViewLedger {
    /// resource path string -> (uid -> quantity)
    pub(crate) bookings: HashMap<String, HashMap<u32, u64>>,
    pub(crate) touched: HashSet<String>,
}

impl ViewLedger {
    pub fn used(&self, resource_path: &str) -> u64 {
        self.bookings
            .get(resource_path)
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    pub fn used_by(&self, resource_path: &str, uid: u32) -> u64 {
        self.bookings
            .get(resource_path)
            .and_then(|m| m.get(&uid))
            .copied()
            .unwrap_or(0)
    }

    pub fn holds_any(&self, uid: u32) -> bool {
        self.bookings.values().any(|m| m.contains_key(&uid))
    }

    pub fn touched_resources(&self) -> impl Iterator<Item = &String> {
        self.touched.iter()
    }
}

#[derive(Debug)]
pub struct ResourceView {
    pub token: ViewToken,
    pub tag: String,
    pub ledger: ViewLedger,
}

impl ResourceView {
    pub fn new(token: ViewToken, tag: impl Into<String>) -> Self {
        Self {
            token,
            tag: tag.into(),
            ledger: ViewLedger::default(),
        }
    }

    pub fn fork(token: ViewToken, tag: impl Into<String>, source: &ResourceView) -> Self {
        Self {
            token,
            tag: tag.into(),
            ledger: source.ledger.clone(),
        }
    }
}

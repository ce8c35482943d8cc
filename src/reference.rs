//! Reference numbers
//!
//! Human-quotable identifiers for transfers, ledger entries and money
//! requests: a kind prefix followed by a ULID (48-bit millisecond timestamp
//! plus 80 bits of entropy).

use std::sync::Mutex;

/// What a reference number identifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Transfer,
    Transaction,
    MoneyRequest,
}

impl ReferenceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ReferenceKind::Transfer => "TRF",
            ReferenceKind::Transaction => "TXN",
            ReferenceKind::MoneyRequest => "REQ",
        }
    }
}

/// Source of reference numbers.
///
/// Implementations must hand out distinct values to concurrent callers; the
/// engine still checks each value against the store before using it.
pub trait ReferenceGenerator: Send + Sync {
    fn next_reference(&self, kind: ReferenceKind) -> String;
}

/// ULID-based generator, monotonic within the process
pub struct UlidReferenceGenerator {
    generator: Mutex<ulid::Generator>,
}

impl UlidReferenceGenerator {
    pub fn new() -> Self {
        Self {
            generator: Mutex::new(ulid::Generator::new()),
        }
    }
}

impl Default for UlidReferenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceGenerator for UlidReferenceGenerator {
    fn next_reference(&self, kind: ReferenceKind) -> String {
        let ulid = {
            let mut generator = self
                .generator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Monotonic overflow needs 2^80 ids in one millisecond; a fresh
            // random ULID is still unique with overwhelming probability.
            generator.generate().unwrap_or_else(|_| ulid::Ulid::new())
        };
        format!("{}-{}", kind.prefix(), ulid)
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Naira;

/// A credit the payment profile refused to take.
#[derive(Debug)]
pub struct LedgerError(pub String);

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ledger refused credit: {}", self.0)
    }
}

impl std::error::Error for LedgerError {}

/// Outbound port to the creators' payment profiles. The engine credits a
/// fixed fare through it whenever a listing verifies; a refusal aborts the
/// verification before any state is mutated.
#[async_trait]
pub trait CreatorLedger: Send + Sync {
    async fn credit(&self, creator_id: Ulid, amount: Naira) -> Result<(), LedgerError>;
}

/// In-process ledger keeping per-creator balances. The default for embedded
/// deployments; hosts bridging to a real payment profile bring their own
/// [`CreatorLedger`].
#[derive(Default)]
pub struct BalanceBook {
    balances: DashMap<Ulid, Naira>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, creator_id: Ulid) -> Naira {
        self.balances.get(&creator_id).map(|b| *b).unwrap_or(0)
    }
}

#[async_trait]
impl CreatorLedger for BalanceBook {
    async fn credit(&self, creator_id: Ulid, amount: Naira) -> Result<(), LedgerError> {
        *self.balances.entry(creator_id).or_insert(0) += amount;
        Ok(())
    }
}

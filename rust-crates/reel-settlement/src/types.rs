use chrono::{
    DateTime,
    Utc,
};
use fuels::types::{
    Address,
    Bits256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Token id of a minted character.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CharacterId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub archetype: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldLedgerEntry {
    pub amount: u64,
    pub last_reason: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpinRequest {
    pub wager: u64,
    pub free_spin: bool,
    pub seed: Bits256,
    pub submitted_at: DateTime<Utc>,
}

impl SpinRequest {
    /// Gold actually taken from the ledger for this round.
    pub fn charged_wager(&self) -> u64 {
        if self.free_spin { 0 } else { self.wager }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpinResult {
    pub sequence: u64,
    pub player: Address,
    pub payout: u64,
    pub jackpot: u64,
    pub board: Vec<u8>,
    pub winning_lines: Vec<u8>,
    pub is_bonus_round: bool,
    pub timestamp: DateTime<Utc>,
}

impl SpinResult {
    pub fn credited(&self) -> u64 {
        self.payout.saturating_add(self.jackpot)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeSpinsAward {
    pub sequence: u64,
    pub player: Address,
    pub count: u32,
}

/// Who the session is playing as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpinContext {
    pub wallet: Address,
    pub character: CharacterId,
}

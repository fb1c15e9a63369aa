//! Collaborators the engine drives but does not own: the wallet, read-only
//! chain access and the off-chain ledger.

use crate::{
    error::SignerError,
    events::RawLog,
    types::{
        Character,
        CharacterId,
        GoldLedgerEntry,
    },
};
use anyhow::{
    Context,
    anyhow,
};
use chrono::{
    DateTime,
    Utc,
};
use fuels::types::{
    Address,
    Bits256,
    Bytes32,
    ContractId,
};
use serde::{
    Deserialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};

pub type TxId = Bytes32;

/// Arguments of the contract's `spin` entry point plus the gas ceiling to
/// send it with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpinCall {
    pub wager: u64,
    pub free_spin: bool,
    pub seed: Bits256,
    pub gas_limit: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxReceipt {
    pub tx_id: TxId,
    pub status: TxStatus,
    pub logs: Vec<RawLog>,
}

/// Account and network notifications pushed by the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    AccountChanged(Option<Address>),
    ChainChanged(u64),
    Disconnected,
}

pub trait WalletGateway {
    /// `None` while no account is connected.
    fn address(&self) -> Option<Address>;

    fn chain_id(&self) -> impl Future<Output = anyhow::Result<u64>>;

    fn estimate_spin_gas(&self, call: &SpinCall) -> impl Future<Output = anyhow::Result<u64>>;

    /// Prompts for a signature and broadcasts the spin.
    fn submit_spin(&self, call: &SpinCall) -> impl Future<Output = Result<TxId, SignerError>>;

    /// Resolves once the transaction is mined, however long that takes.
    fn wait_for_receipt(
        &self,
        tx: &TxId,
    ) -> impl Future<Output = Result<TxReceipt, SignerError>>;

    /// Signed call that makes `character` the wallet's active character.
    /// Resolves once the bind transaction is confirmed.
    fn bind_active_character(
        &self,
        character: CharacterId,
    ) -> impl Future<Output = Result<TxId, SignerError>>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadCall {
    pub contract: ContractId,
    pub method: &'static str,
    pub args: Vec<Value>,
}

/// Non-mutating contract access. Never prompts the wallet.
pub trait ChainReader {
    /// One result per call, in order.
    fn read_batch(
        &self,
        calls: &[ReadCall],
    ) -> impl Future<Output = anyhow::Result<Vec<Value>>>;
}

/// The authoritative off-chain gold store.
pub trait LedgerService {
    fn apply_delta(
        &self,
        character: CharacterId,
        delta: i64,
        reason: &str,
    ) -> impl Future<Output = anyhow::Result<GoldLedgerEntry>>;

    fn fetch_entry(
        &self,
        character: CharacterId,
    ) -> impl Future<Output = anyhow::Result<GoldLedgerEntry>>;
}

/// Writes the on-chain gold mirror.
pub trait MirrorSync {
    fn push_mirror(
        &self,
        character: CharacterId,
        amount: u64,
    ) -> impl Future<Output = anyhow::Result<()>>;
}

pub const ACTIVE_CHARACTER: &str = "active_character";
pub const CHARACTERS_OF: &str = "characters_of";
pub const FREE_SPINS_OF: &str = "free_spins_of";
pub const GOLD_OF: &str = "gold_of";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub active_character: Option<CharacterId>,
    pub free_spins: u32,
    pub mirrored_gold: u64,
}

/// Typed view of the slot contract's read methods.
pub struct SlotContractReader<R> {
    reader: R,
    contract: ContractId,
}

impl<R: ChainReader> SlotContractReader<R> {
    pub fn new(reader: R, contract: ContractId) -> Self {
        Self { reader, contract }
    }

    pub async fn active_character(
        &self,
        wallet: &Address,
    ) -> anyhow::Result<Option<CharacterId>> {
        let raw: Option<u64> = self.read_one(self.active_character_call(wallet)).await?;
        Ok(active_from_raw(raw))
    }

    pub async fn characters_of(&self, wallet: &Address) -> anyhow::Result<Vec<Character>> {
        let call = self.call(CHARACTERS_OF, vec![json!(wallet.to_string())]);
        let dtos: Vec<CharacterDto> = self.read_one(call).await?;
        dtos.into_iter().map(CharacterDto::into_character).collect()
    }

    /// Binding, free-spin credits and mirrored gold in one round trip.
    pub async fn account_state(
        &self,
        wallet: &Address,
        character: CharacterId,
    ) -> anyhow::Result<AccountState> {
        let calls = [
            self.active_character_call(wallet),
            self.call(FREE_SPINS_OF, vec![json!(wallet.to_string())]),
            self.call(GOLD_OF, vec![json!(character.0)]),
        ];
        let values = self.reader.read_batch(&calls).await?;
        let [active, free_spins, gold]: [Value; 3] = values
            .try_into()
            .map_err(|v: Vec<Value>| anyhow!("expected 3 read results, got {}", v.len()))?;
        Ok(AccountState {
            active_character: active_from_raw(decode(ACTIVE_CHARACTER, active)?),
            free_spins: decode(FREE_SPINS_OF, free_spins)?,
            mirrored_gold: decode(GOLD_OF, gold)?,
        })
    }

    fn active_character_call(&self, wallet: &Address) -> ReadCall {
        self.call(ACTIVE_CHARACTER, vec![json!(wallet.to_string())])
    }

    fn call(&self, method: &'static str, args: Vec<Value>) -> ReadCall {
        ReadCall {
            contract: self.contract,
            method,
            args,
        }
    }

    async fn read_one<T: DeserializeOwned>(&self, call: ReadCall) -> anyhow::Result<T> {
        let method = call.method;
        let mut values = self
            .reader
            .read_batch(std::slice::from_ref(&call))
            .await
            .with_context(|| format!("reading {method}"))?;
        let value = values
            .pop()
            .ok_or_else(|| anyhow!("{method} returned no result"))?;
        decode(method, value)
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> anyhow::Result<T> {
    serde_json::from_value(value).with_context(|| format!("invalid {method} result"))
}

/// The contract reports "no active character" as id 0.
fn active_from_raw(raw: Option<u64>) -> Option<CharacterId> {
    raw.filter(|id| *id != 0).map(CharacterId)
}

#[derive(Deserialize)]
struct CharacterDto {
    id: u64,
    name: String,
    archetype: String,
    created_at: i64,
}

impl CharacterDto {
    fn into_character(self) -> anyhow::Result<Character> {
        let created_at = DateTime::<Utc>::from_timestamp(self.created_at, 0)
            .ok_or_else(|| anyhow!("character {} has invalid creation time", self.id))?;
        Ok(Character {
            id: CharacterId(self.id),
            name: self.name,
            archetype: self.archetype,
            created_at,
        })
    }
}

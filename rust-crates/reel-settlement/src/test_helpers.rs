//! Hand-written fakes for the engine's collaborators.

use crate::{
    binder::{
        BindingTransport,
        BindingTransportError,
    },
    error::SignerError,
    events::{
        FREE_SPINS_AWARDED,
        RawLog,
        SPIN_SETTLED,
    },
    ports::{
        ACTIVE_CHARACTER,
        CHARACTERS_OF,
        ChainReader,
        FREE_SPINS_OF,
        GOLD_OF,
        LedgerService,
        MirrorSync,
        ReadCall,
        SpinCall,
        TxId,
        TxReceipt,
        TxStatus,
        WalletGateway,
    },
    types::{
        CharacterId,
        GoldLedgerEntry,
    },
};
use anyhow::{
    anyhow,
    bail,
};
use chrono::Utc;
use fuels::types::{
    Address,
    ContractId,
};
use futures::{
    FutureExt,
    future::LocalBoxFuture,
};
use serde_json::{
    Value,
    json,
};
use std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::{
        HashMap,
        VecDeque,
    },
    rc::Rc,
};

pub fn settled_log(
    contract: ContractId,
    player: Address,
    sequence: u64,
    payout: u64,
    board: &[u8],
    winning_lines: &[u8],
) -> RawLog {
    RawLog {
        emitter: contract,
        name: SPIN_SETTLED.to_string(),
        data: json!({
            "sequenceNumber": sequence.to_string(),
            "player": player.to_string(),
            "payoutAmount": payout,
            "jackpotAmount": 0,
            "board": board,
            "winningLineIndices": winning_lines,
            "isBonusRound": false,
            "timestamp": 1_700_000_000,
        }),
    }
}

pub fn free_spins_log(
    contract: ContractId,
    player: Address,
    sequence: u64,
    count: u32,
) -> RawLog {
    RawLog {
        emitter: contract,
        name: FREE_SPINS_AWARDED.to_string(),
        data: json!({
            "sequenceNumber": sequence,
            "player": player.to_string(),
            "count": count,
        }),
    }
}

#[derive(Default)]
struct ChainState {
    active: HashMap<String, u64>,
    free_spins: HashMap<String, u32>,
    gold: HashMap<u64, u64>,
    rosters: HashMap<String, Vec<Value>>,
    batches: Vec<usize>,
    fail_reads: bool,
}

impl ChainState {
    fn answer(&self, call: &ReadCall) -> anyhow::Result<Value> {
        let arg = call.args.first().cloned().unwrap_or(Value::Null);
        let key = arg.as_str().unwrap_or_default();
        let value = match call.method {
            ACTIVE_CHARACTER => json!(self.active.get(key).copied().unwrap_or(0)),
            FREE_SPINS_OF => json!(self.free_spins.get(key).copied().unwrap_or(0)),
            GOLD_OF => {
                let character = arg.as_u64().ok_or_else(|| anyhow!("bad gold_of arg"))?;
                json!(self.gold.get(&character).copied().unwrap_or(0))
            }
            CHARACTERS_OF => json!(self.rosters.get(key).cloned().unwrap_or_default()),
            other => bail!("unknown read method {other}"),
        };
        Ok(value)
    }
}

/// Contract state keyed by wallet, answering reads by method name.
#[derive(Clone, Default)]
pub struct FakeChainReader {
    state: Rc<RefCell<ChainState>>,
}

impl FakeChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_character(&self, wallet: Address, character: Option<CharacterId>) {
        let id = character.map(|c| c.0).unwrap_or(0);
        self.state
            .borrow_mut()
            .active
            .insert(wallet.to_string(), id);
    }

    pub fn active_character(&self, wallet: Address) -> Option<CharacterId> {
        self.state
            .borrow()
            .active
            .get(&wallet.to_string())
            .filter(|id| **id != 0)
            .map(|id| CharacterId(*id))
    }

    pub fn set_free_spins(&self, wallet: Address, count: u32) {
        self.state
            .borrow_mut()
            .free_spins
            .insert(wallet.to_string(), count);
    }

    pub fn set_mirrored_gold(&self, character: CharacterId, amount: u64) {
        self.state.borrow_mut().gold.insert(character.0, amount);
    }

    pub fn add_character(&self, wallet: Address, id: u64, name: &str, archetype: &str) {
        self.state
            .borrow_mut()
            .rosters
            .entry(wallet.to_string())
            .or_default()
            .push(json!({
                "id": id,
                "name": name,
                "archetype": archetype,
                "created_at": 1_690_000_000,
            }));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_reads = fail;
    }

    /// Size of every batch read so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.borrow().batches.clone()
    }
}

impl ChainReader for FakeChainReader {
    async fn read_batch(&self, calls: &[ReadCall]) -> anyhow::Result<Vec<Value>> {
        let mut state = self.state.borrow_mut();
        if state.fail_reads {
            bail!("chain node unreachable");
        }
        state.batches.push(calls.len());
        calls.iter().map(|call| state.answer(call)).collect()
    }
}

#[derive(Clone, Debug)]
pub enum ReceiptScript {
    Logs(Vec<RawLog>),
    Reverted(String),
    /// Never resolves.
    Hang,
}

pub struct FakeWallet {
    address: Cell<Option<Address>>,
    chain_id: Cell<u64>,
    estimate: Cell<Option<u64>>,
    submissions: RefCell<VecDeque<Result<(), SignerError>>>,
    receipts: RefCell<VecDeque<ReceiptScript>>,
    receipt_delay: Cell<usize>,
    spin_calls: RefCell<Vec<SpinCall>>,
    reject_binds: Cell<bool>,
    bind_calls: Cell<usize>,
    chain: Option<FakeChainReader>,
    next_tx: Cell<u8>,
}

impl FakeWallet {
    pub fn new(address: Address, chain_id: u64) -> Self {
        Self {
            address: Cell::new(Some(address)),
            chain_id: Cell::new(chain_id),
            estimate: Cell::new(Some(300_000)),
            submissions: RefCell::new(VecDeque::new()),
            receipts: RefCell::new(VecDeque::new()),
            receipt_delay: Cell::new(0),
            spin_calls: RefCell::new(Vec::new()),
            reject_binds: Cell::new(false),
            bind_calls: Cell::new(0),
            chain: None,
            next_tx: Cell::new(1),
        }
    }

    /// Successful wallet-signed binds update `chain`.
    pub fn with_chain(mut self, chain: FakeChainReader) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn set_address(&self, address: Option<Address>) {
        self.address.set(address);
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.set(chain_id);
    }

    /// `None` makes gas estimation fail.
    pub fn set_estimate(&self, estimate: Option<u64>) {
        self.estimate.set(estimate);
    }

    pub fn push_submission(&self, outcome: Result<(), SignerError>) {
        self.submissions.borrow_mut().push_back(outcome);
    }

    pub fn push_receipt(&self, receipt: ReceiptScript) {
        self.receipts.borrow_mut().push_back(receipt);
    }

    /// Yields to the scheduler `polls` times before each receipt resolves.
    pub fn delay_receipts(&self, polls: usize) {
        self.receipt_delay.set(polls);
    }

    pub fn reject_binds(&self, reject: bool) {
        self.reject_binds.set(reject);
    }

    pub fn spin_calls(&self) -> Vec<SpinCall> {
        self.spin_calls.borrow().clone()
    }

    pub fn bind_calls(&self) -> usize {
        self.bind_calls.get()
    }

    fn next_tx_id(&self) -> TxId {
        let n = self.next_tx.get();
        self.next_tx.set(n.wrapping_add(1));
        TxId::from([n; 32])
    }
}

impl WalletGateway for FakeWallet {
    fn address(&self) -> Option<Address> {
        self.address.get()
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self.chain_id.get())
    }

    async fn estimate_spin_gas(&self, _call: &SpinCall) -> anyhow::Result<u64> {
        self.estimate
            .get()
            .ok_or_else(|| anyhow!("dry run failed: out of gas"))
    }

    async fn submit_spin(&self, call: &SpinCall) -> Result<TxId, SignerError> {
        self.spin_calls.borrow_mut().push(call.clone());
        let outcome = self.submissions.borrow_mut().pop_front().unwrap_or(Ok(()));
        outcome.map(|()| self.next_tx_id())
    }

    async fn wait_for_receipt(&self, tx: &TxId) -> Result<TxReceipt, SignerError> {
        for _ in 0..self.receipt_delay.get() {
            tokio::task::yield_now().await;
        }
        let script = self
            .receipts
            .borrow_mut()
            .pop_front()
            .unwrap_or(ReceiptScript::Logs(vec![]));
        let status = match script {
            ReceiptScript::Logs(logs) => {
                return Ok(TxReceipt {
                    tx_id: *tx,
                    status: TxStatus::Success,
                    logs,
                });
            }
            ReceiptScript::Reverted(reason) => TxStatus::Reverted(reason),
            ReceiptScript::Hang => std::future::pending().await,
        };
        Ok(TxReceipt {
            tx_id: *tx,
            status,
            logs: vec![],
        })
    }

    async fn bind_active_character(&self, character: CharacterId) -> Result<TxId, SignerError> {
        self.bind_calls.set(self.bind_calls.get() + 1);
        if self.reject_binds.get() {
            return Err(SignerError::Rejected);
        }
        if let (Some(chain), Some(wallet)) = (&self.chain, self.address.get()) {
            chain.set_active_character(wallet, Some(character));
        }
        Ok(self.next_tx_id())
    }
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<CharacterId, GoldLedgerEntry>,
    reasons: Vec<String>,
    fail_writes: bool,
    fail_reads: bool,
}

/// Authoritative ledger held in memory.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Rc<RefCell<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, character: CharacterId, amount: u64) {
        self.state.borrow_mut().entries.insert(
            character,
            GoldLedgerEntry {
                amount,
                last_reason: "seed".to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn amount(&self, character: CharacterId) -> Option<u64> {
        self.state
            .borrow()
            .entries
            .get(&character)
            .map(|entry| entry.amount)
    }

    /// Number of deltas applied so far.
    pub fn writes(&self) -> usize {
        self.state.borrow().reasons.len()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.state.borrow().reasons.clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_reads = fail;
    }
}

impl LedgerService for InMemoryLedger {
    async fn apply_delta(
        &self,
        character: CharacterId,
        delta: i64,
        reason: &str,
    ) -> anyhow::Result<GoldLedgerEntry> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            bail!("ledger service unavailable");
        }
        let current = state
            .entries
            .get(&character)
            .map(|entry| entry.amount)
            .unwrap_or(0);
        let amount = current
            .checked_add_signed(delta)
            .ok_or_else(|| anyhow!("delta {delta} would overdraw {current}"))?;
        let entry = GoldLedgerEntry {
            amount,
            last_reason: reason.to_string(),
            updated_at: Utc::now(),
        };
        state.entries.insert(character, entry.clone());
        state.reasons.push(reason.to_string());
        Ok(entry)
    }

    async fn fetch_entry(&self, character: CharacterId) -> anyhow::Result<GoldLedgerEntry> {
        let state = self.state.borrow();
        if state.fail_reads {
            bail!("ledger service unavailable");
        }
        state
            .entries
            .get(&character)
            .cloned()
            .ok_or_else(|| anyhow!("no ledger entry for character {character}"))
    }
}

#[derive(Default)]
struct MirrorLog {
    pushed: Vec<(CharacterId, u64)>,
    fail: bool,
}

#[derive(Clone, Default)]
pub struct FakeMirror {
    log: Rc<RefCell<MirrorLog>>,
}

impl FakeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.log.borrow_mut().fail = fail;
    }

    /// Successful pushes, oldest first.
    pub fn pushed(&self) -> Vec<(CharacterId, u64)> {
        self.log.borrow().pushed.clone()
    }
}

impl MirrorSync for FakeMirror {
    async fn push_mirror(&self, character: CharacterId, amount: u64) -> anyhow::Result<()> {
        let mut log = self.log.borrow_mut();
        if log.fail {
            bail!("mirror transaction failed");
        }
        log.pushed.push((character, amount));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TransportScript {
    Succeed,
    Cancel,
    Fail(&'static str),
}

/// Binding transport with a fixed outcome that counts its calls.
#[derive(Clone)]
pub struct ScriptedTransport {
    name: &'static str,
    script: TransportScript,
    yields: usize,
    calls: Rc<Cell<usize>>,
    chain: Option<FakeChainReader>,
}

impl ScriptedTransport {
    pub fn new(name: &'static str, script: TransportScript) -> Self {
        Self {
            name,
            script,
            yields: 0,
            calls: Rc::new(Cell::new(0)),
            chain: None,
        }
    }

    /// Suspends `yields` times before completing.
    pub fn yielding(mut self, yields: usize) -> Self {
        self.yields = yields;
        self
    }

    /// Successful binds update `chain`.
    pub fn with_chain(mut self, chain: FakeChainReader) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl BindingTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn bind<'a>(
        &'a self,
        wallet: Address,
        character: CharacterId,
    ) -> LocalBoxFuture<'a, Result<(), BindingTransportError>> {
        async move {
            self.calls.set(self.calls.get() + 1);
            for _ in 0..self.yields {
                tokio::task::yield_now().await;
            }
            match self.script {
                TransportScript::Succeed => {
                    if let Some(chain) = &self.chain {
                        chain.set_active_character(wallet, Some(character));
                    }
                    Ok(())
                }
                TransportScript::Cancel => Err(BindingTransportError::Cancelled),
                TransportScript::Fail(reason) => Err(anyhow!(reason).into()),
            }
        }
        .boxed_local()
    }
}

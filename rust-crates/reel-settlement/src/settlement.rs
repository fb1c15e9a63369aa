//! Drives one wager from submission to a settled, deduplicated result.
//!
//! Results reach the processor through two unordered channels: the logs of the
//! spin's own receipt and the contract's live event feed. Both funnel through
//! [`SettlementProcessor::settle`], where the processed-sequence check makes
//! sure a result touches the ledger at most once.
//!
//! Every submitted spin stays outstanding, keyed by its transaction, until a
//! result is attributed to it. A receipt's result only settles the receipt's
//! own spin; a live result, which carries no transaction, settles the oldest
//! outstanding one.

use crate::{
    binder::{
        BindingStatus,
        CharacterBinder,
    },
    config::SessionConfig,
    error::SpinError,
    events::{
        ContractEvent,
        RawLog,
        parse_event_log,
        parse_event_logs,
    },
    paylines::{
        Cell,
        LineHighlight,
        explain_lines,
    },
    ports::{
        ChainReader,
        LedgerService,
        MirrorSync,
        SpinCall,
        TxId,
        TxReceipt,
        TxStatus,
        WalletGateway,
    },
    processed::ProcessedSequenceSet,
    reconciler::Reconciler,
    types::{
        CharacterId,
        FreeSpinsAward,
        SpinContext,
        SpinRequest,
        SpinResult,
    },
};
use chrono::Utc;
use fuels::types::Bits256;
use std::{
    collections::{
        BTreeSet,
        VecDeque,
    },
    rc::Rc,
};
use tokio::sync::{
    mpsc,
    mpsc::error::TryRecvError,
    watch,
};
use tracing::{
    debug,
    info,
    trace,
    warn,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpinPhase {
    Idle,
    Submitting,
    AwaitingConfirmation,
    ExtractingResult,
    Settled,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasSource {
    Estimated(u64),
    /// Estimation failed and the conservative ceiling was used instead.
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasCeiling {
    pub limit: u64,
    pub source: GasSource,
}

impl GasCeiling {
    pub fn from_estimate(estimate: anyhow::Result<u64>, config: &SessionConfig) -> Self {
        match estimate {
            Ok(estimated) => Self {
                limit: estimated
                    .saturating_mul(config.gas_multiplier)
                    .max(config.min_gas_limit),
                source: GasSource::Estimated(estimated),
            },
            Err(err) => {
                warn!(
                    ?err,
                    fallback = config.fallback_gas_limit,
                    "gas estimation failed; submitting with fallback ceiling"
                );
                Self {
                    limit: config.fallback_gas_limit,
                    source: GasSource::Fallback,
                }
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == GasSource::Fallback
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryChannel {
    Receipt(TxId),
    LiveSubscription,
}

/// What the UI needs to present a settled round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpinReport {
    /// Spin transaction the result was attributed to.
    pub tx: TxId,
    pub sequence: u64,
    pub payout: u64,
    pub jackpot: u64,
    pub credited: u64,
    pub charged_wager: u64,
    pub free_spin: bool,
    pub board: Vec<u8>,
    pub highlighted: BTreeSet<Cell>,
    pub lines: Vec<LineHighlight>,
    pub is_bonus_round: bool,
    /// Authoritative balance right after the commit.
    pub balance: u64,
    pub free_spins_awarded: u32,
    pub gas: Option<GasCeiling>,
    pub channel: DeliveryChannel,
}

impl SpinReport {
    pub fn is_win(&self) -> bool {
        self.credited > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied(SpinReport),
    Duplicate(u64),
    /// No spin of this session was waiting for the result.
    Unattributed(u64),
}

struct OutstandingSpin {
    tx: TxId,
    request: SpinRequest,
    gas: Option<GasCeiling>,
}

pub struct SettlementProcessor<W> {
    wallet: Rc<W>,
    config: SessionConfig,
    processed: ProcessedSequenceSet,
    awarded: ProcessedSequenceSet,
    free_spin_credits: u32,
    outstanding: VecDeque<OutstandingSpin>,
    late: Vec<SpinReport>,
    live: Option<mpsc::UnboundedReceiver<RawLog>>,
    phase: watch::Sender<SpinPhase>,
}

impl<W: WalletGateway> SettlementProcessor<W> {
    pub fn new(wallet: Rc<W>, config: SessionConfig) -> Self {
        let processed =
            ProcessedSequenceSet::new(config.processed_high_water, config.processed_retain);
        let (phase, _) = watch::channel(SpinPhase::Idle);
        Self {
            wallet,
            awarded: processed.clone(),
            processed,
            config,
            free_spin_credits: 0,
            outstanding: VecDeque::new(),
            late: Vec::new(),
            live: None,
            phase,
        }
    }

    pub fn phase(&self) -> watch::Receiver<SpinPhase> {
        self.phase.subscribe()
    }

    pub fn free_spin_credits(&self) -> u32 {
        self.free_spin_credits
    }

    pub fn set_free_spin_credits(&mut self, credits: u32) {
        self.free_spin_credits = credits;
    }

    pub fn attach_live_feed(&mut self, feed: mpsc::UnboundedReceiver<RawLog>) {
        self.live = Some(feed);
    }

    /// Spins submitted but not yet settled.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Results of earlier spins that were settled while a later spin was
    /// awaiting its confirmation.
    pub fn take_late_reports(&mut self) -> Vec<SpinReport> {
        std::mem::take(&mut self.late)
    }

    /// Forgets everything tied to the current wallet. The live feed stays
    /// attached.
    pub fn reset(&mut self) {
        self.processed.clear();
        self.awarded.clear();
        self.free_spin_credits = 0;
        self.outstanding.clear();
        self.late.clear();
        self.set_phase(SpinPhase::Idle);
    }

    /// Runs one spin to completion. Always leaves the processor idle.
    pub async fn submit<R, L, M>(
        &mut self,
        ctx: SpinContext,
        wager: u64,
        binder: &CharacterBinder<R>,
        reconciler: &mut Reconciler<L, M>,
    ) -> Result<SpinReport, SpinError>
    where
        R: ChainReader,
        L: LedgerService,
        M: MirrorSync,
    {
        let result = self.run(ctx, wager, binder, reconciler).await;
        if let Err(err) = &result {
            if err.is_cancellation() {
                info!(wallet = %ctx.wallet, "spin cancelled at signature prompt");
            } else {
                warn!(%err, wallet = %ctx.wallet, "spin failed");
                self.set_phase(SpinPhase::Failed);
            }
            if err.requires_resync() {
                resync(reconciler, ctx.character).await;
            }
        }
        self.set_phase(SpinPhase::Idle);
        result
    }

    async fn run<R, L, M>(
        &mut self,
        ctx: SpinContext,
        wager: u64,
        binder: &CharacterBinder<R>,
        reconciler: &mut Reconciler<L, M>,
    ) -> Result<SpinReport, SpinError>
    where
        R: ChainReader,
        L: LedgerService,
        M: MirrorSync,
    {
        self.set_phase(SpinPhase::Submitting);
        let actual = self
            .wallet
            .chain_id()
            .await
            .map_err(|err| SpinError::Provider(format!("{err:#}")))?;
        if actual != self.config.required_chain_id {
            return Err(SpinError::NetworkMismatch {
                expected: self.config.required_chain_id,
                actual,
            });
        }
        match binder.ensure_bound(ctx.wallet, ctx.character).await? {
            BindingStatus::Bound => {}
            status => {
                debug!(?status, "character binding not in place");
                return Err(SpinError::BindingPending);
            }
        }

        let reserved_free_spins = self
            .outstanding
            .iter()
            .filter(|spin| spin.request.free_spin)
            .count();
        let free_spin = usize::try_from(self.free_spin_credits)
            .is_ok_and(|credits| credits > reserved_free_spins);
        if !free_spin {
            if wager == 0 {
                return Err(SpinError::InvalidWager);
            }
            let reserved = self
                .outstanding
                .iter()
                .map(|spin| spin.request.charged_wager())
                .sum();
            check_funds(reconciler, ctx.character, wager, reserved).await?;
        }

        let request = SpinRequest {
            wager,
            free_spin,
            seed: Bits256(rand::random()),
            submitted_at: Utc::now(),
        };
        let mut call = SpinCall {
            wager,
            free_spin,
            seed: request.seed,
            gas_limit: 0,
        };
        let gas = GasCeiling::from_estimate(
            self.wallet.estimate_spin_gas(&call).await,
            &self.config,
        );
        call.gas_limit = gas.limit;
        info!(wager, free_spin, gas_limit = gas.limit, "submitting spin");
        let tx = self.wallet.submit_spin(&call).await?;
        self.outstanding.push_back(OutstandingSpin {
            tx,
            request,
            gas: Some(gas),
        });
        if self.outstanding.len() > self.config.processed_retain {
            if let Some(abandoned) = self.outstanding.pop_front() {
                warn!(tx = %abandoned.tx, "giving up on oldest unsettled spin");
            }
        }

        self.set_phase(SpinPhase::AwaitingConfirmation);
        info!(%tx, "spin submitted; awaiting confirmation");
        let (receipt, live_report) = self.await_confirmation(&tx, ctx, reconciler).await?;

        self.set_phase(SpinPhase::ExtractingResult);
        if let TxStatus::Reverted(reason) = receipt.status {
            self.outstanding.retain(|spin| spin.tx != tx);
            return Err(SpinError::ContractRejected(reason));
        }
        let mut report = live_report;
        let mut awarded = 0;
        for event in parse_event_logs(&self.config.contract_id, &receipt.logs) {
            if *event.player() != ctx.wallet {
                continue;
            }
            match event {
                ContractEvent::FreeSpinsAwarded(award) => awarded += self.credit_award(&award),
                ContractEvent::SpinSettled(result) => {
                    match self
                        .settle(result, ctx.character, DeliveryChannel::Receipt(tx), reconciler)
                        .await?
                    {
                        SettleOutcome::Applied(applied) => report = Some(applied),
                        SettleOutcome::Duplicate(sequence) => {
                            debug!(sequence, "receipt repeats an already settled result");
                        }
                        SettleOutcome::Unattributed(sequence) => {
                            debug!(sequence, "receipt result had no outstanding spin");
                        }
                    }
                }
            }
        }
        let Some(mut report) = report else {
            warn!(%tx, "confirmed spin carried no settlement event");
            return Err(SpinError::ResultNotFound { tx: tx.to_string() });
        };
        report.free_spins_awarded += awarded;
        self.set_phase(SpinPhase::Settled);
        Ok(report)
    }

    /// Waits for the receipt while settling whatever the live feed delivers
    /// in the meantime.
    async fn await_confirmation<L, M>(
        &mut self,
        tx: &TxId,
        ctx: SpinContext,
        reconciler: &mut Reconciler<L, M>,
    ) -> Result<(TxReceipt, Option<SpinReport>), SpinError>
    where
        L: LedgerService,
        M: MirrorSync,
    {
        let wallet = Rc::clone(&self.wallet);
        let receipt = wallet.wait_for_receipt(tx);
        tokio::pin!(receipt);
        let timeout = self.config.confirmation_timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut live_report = None;
        loop {
            tokio::select! {
                biased;
                outcome = &mut receipt => return Ok((outcome?, live_report)),
                log = next_live(&mut self.live) => match log {
                    Some(log) => {
                        match self.absorb_live(log, ctx, reconciler).await? {
                            Some(report) if report.tx == *tx => live_report = Some(report),
                            Some(report) => self.late.push(report),
                            None => {}
                        }
                    }
                    None => {
                        debug!("live feed closed");
                        self.live = None;
                    }
                },
                () = &mut deadline => {
                    warn!(%tx, ?timeout, "no confirmation before timeout");
                    return Err(SpinError::ResultNotFound { tx: tx.to_string() });
                }
            }
        }
    }

    /// Settles everything already buffered on the live feed without waiting.
    pub async fn drain_live_events<L, M>(
        &mut self,
        ctx: SpinContext,
        reconciler: &mut Reconciler<L, M>,
    ) -> Vec<Result<SpinReport, SpinError>>
    where
        L: LedgerService,
        M: MirrorSync,
    {
        let mut outcomes = Vec::new();
        loop {
            let Some(feed) = self.live.as_mut() else {
                break;
            };
            let log = match feed.try_recv() {
                Ok(log) => log,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("live feed closed");
                    self.live = None;
                    break;
                }
            };
            match self.absorb_live(log, ctx, reconciler).await {
                Ok(Some(report)) => outcomes.push(Ok(report)),
                Ok(None) => {}
                Err(err) => {
                    if err.requires_resync() {
                        resync(reconciler, ctx.character).await;
                    }
                    outcomes.push(Err(err));
                }
            }
        }
        outcomes
    }

    async fn absorb_live<L, M>(
        &mut self,
        log: RawLog,
        ctx: SpinContext,
        reconciler: &mut Reconciler<L, M>,
    ) -> Result<Option<SpinReport>, SpinError>
    where
        L: LedgerService,
        M: MirrorSync,
    {
        let Some(event) = parse_event_log(&self.config.contract_id, &log) else {
            return Ok(None);
        };
        if *event.player() != ctx.wallet {
            trace!(player = %event.player(), "live event for another player");
            return Ok(None);
        }
        match event {
            ContractEvent::FreeSpinsAwarded(award) => {
                self.credit_award(&award);
                Ok(None)
            }
            ContractEvent::SpinSettled(result) => {
                let sequence = result.sequence;
                match self
                    .settle(result, ctx.character, DeliveryChannel::LiveSubscription, reconciler)
                    .await?
                {
                    SettleOutcome::Applied(report) => Ok(Some(report)),
                    SettleOutcome::Duplicate(_) => {
                        trace!(sequence, "live result already settled");
                        Ok(None)
                    }
                    SettleOutcome::Unattributed(_) => Ok(None),
                }
            }
        }
    }

    /// The single entry point from any delivery channel into the ledger.
    pub async fn settle<L, M>(
        &mut self,
        result: SpinResult,
        character: CharacterId,
        channel: DeliveryChannel,
        reconciler: &mut Reconciler<L, M>,
    ) -> Result<SettleOutcome, SpinError>
    where
        L: LedgerService,
        M: MirrorSync,
    {
        let sequence = result.sequence;
        if self.processed.contains(sequence) {
            return Ok(SettleOutcome::Duplicate(sequence));
        }
        let claimed = match channel {
            DeliveryChannel::Receipt(tx) => self.outstanding.iter().position(|spin| spin.tx == tx),
            DeliveryChannel::LiveSubscription => (!self.outstanding.is_empty()).then_some(0),
        };
        let Some(spin) = claimed.and_then(|index| self.outstanding.remove(index)) else {
            info!(sequence, ?channel, "ignoring result with no outstanding spin");
            return Ok(SettleOutcome::Unattributed(sequence));
        };
        self.processed.insert(sequence);

        let request = spin.request;
        let charged_wager = request.charged_wager();
        let credited = result.credited();
        let delta = i64::try_from(i128::from(credited) - i128::from(charged_wager))
            .map_err(|_| {
                SpinError::LedgerWriteFailed(format!("delta of spin #{sequence} out of range"))
            })?;
        if request.free_spin {
            self.free_spin_credits = self.free_spin_credits.saturating_sub(1);
        }
        let entry = reconciler
            .commit(character, delta, &format!("spin #{sequence}"))
            .await?;

        let lines = explain_lines(&result.board, &result.winning_lines);
        let highlighted = lines
            .iter()
            .flat_map(|line| line.cells.iter().copied())
            .collect();
        info!(
            sequence,
            ?channel,
            payout = result.payout,
            jackpot = result.jackpot,
            delta,
            balance = entry.amount,
            "spin settled"
        );
        Ok(SettleOutcome::Applied(SpinReport {
            tx: spin.tx,
            sequence,
            payout: result.payout,
            jackpot: result.jackpot,
            credited,
            charged_wager,
            free_spin: request.free_spin,
            board: result.board,
            highlighted,
            lines,
            is_bonus_round: result.is_bonus_round,
            balance: entry.amount,
            free_spins_awarded: 0,
            gas: spin.gas,
            channel,
        }))
    }

    fn credit_award(&mut self, award: &FreeSpinsAward) -> u32 {
        if !self.awarded.insert(award.sequence) {
            return 0;
        }
        self.free_spin_credits = self.free_spin_credits.saturating_add(award.count);
        info!(
            sequence = award.sequence,
            count = award.count,
            credits = self.free_spin_credits,
            "free spins awarded"
        );
        award.count
    }

    fn set_phase(&self, phase: SpinPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "spin phase changed");
        }
    }
}

async fn next_live(feed: &mut Option<mpsc::UnboundedReceiver<RawLog>>) -> Option<RawLog> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

/// `reserved` is gold already wagered by spins that have not settled yet.
async fn check_funds<L, M>(
    reconciler: &mut Reconciler<L, M>,
    character: CharacterId,
    wager: u64,
    reserved: u64,
) -> Result<(), SpinError>
where
    L: LedgerService,
    M: MirrorSync,
{
    let cached = reconciler.entry(character).map(|entry| entry.amount);
    let available = match cached {
        Some(amount) => amount,
        None => {
            reconciler
                .resync(character)
                .await
                .map_err(|err| SpinError::LedgerUnavailable(format!("{err:#}")))?
                .amount
        }
    };
    let available = available.saturating_sub(reserved);
    if wager > available {
        return Err(SpinError::InsufficientFunds { wager, available });
    }
    Ok(())
}

async fn resync<L, M>(reconciler: &mut Reconciler<L, M>, character: CharacterId)
where
    L: LedgerService,
    M: MirrorSync,
{
    match reconciler.resync(character).await {
        Ok(entry) => info!(%character, balance = entry.amount, "balance refreshed after failure"),
        Err(err) => warn!(?err, %character, "balance refresh failed"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        binder::BindingTransport,
        config::{
            FALLBACK_SPIN_GAS_LIMIT,
            MIN_SPIN_GAS_LIMIT,
        },
        ports::SlotContractReader,
        test_helpers::{
            FakeChainReader,
            FakeMirror,
            FakeWallet,
            InMemoryLedger,
            ScriptedTransport,
            TransportScript,
        },
    };
    use anyhow::anyhow;
    use chrono::DateTime;
    use fuels::types::{
        Address,
        ContractId,
    };

    const HERO: CharacterId = CharacterId(1);

    fn player() -> Address {
        Address::from([1u8; 32])
    }

    fn config() -> SessionConfig {
        SessionConfig::new(ContractId::from([9u8; 32]), 0)
    }

    fn processor() -> SettlementProcessor<FakeWallet> {
        let wallet = Rc::new(FakeWallet::new(player(), 0));
        SettlementProcessor::new(wallet, config())
    }

    fn reconciler(balance: u64) -> (Reconciler<InMemoryLedger, FakeMirror>, InMemoryLedger) {
        let ledger = InMemoryLedger::new();
        ledger.seed(HERO, balance);
        let mut reconciler = Reconciler::new(ledger.clone(), FakeMirror::new());
        reconciler.set_active(HERO);
        (reconciler, ledger)
    }

    fn tx(n: u8) -> TxId {
        TxId::from([n; 32])
    }

    fn outstanding(tx_byte: u8, wager: u64, free_spin: bool) -> OutstandingSpin {
        OutstandingSpin {
            tx: tx(tx_byte),
            request: SpinRequest {
                wager,
                free_spin,
                seed: Bits256([0; 32]),
                submitted_at: Utc::now(),
            },
            gas: None,
        }
    }

    fn result(sequence: u64, payout: u64) -> SpinResult {
        SpinResult {
            sequence,
            player: player(),
            payout,
            jackpot: 0,
            board: vec![2, 2, 2, 7, 7, 0, 1, 3, 4, 5, 6, 0, 1, 3, 4],
            winning_lines: if payout > 0 { vec![0] } else { vec![] },
            is_bonus_round: false,
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn gas_ceiling__estimate__doubled() {
        let ceiling = GasCeiling::from_estimate(Ok(300_000), &config());

        assert_eq!(ceiling.limit, 600_000);
        assert_eq!(ceiling.source, GasSource::Estimated(300_000));
    }

    #[test]
    fn gas_ceiling__small_estimate__raised_to_minimum() {
        let ceiling = GasCeiling::from_estimate(Ok(10_000), &config());

        assert_eq!(ceiling.limit, MIN_SPIN_GAS_LIMIT);
    }

    #[test]
    fn gas_ceiling__estimation_error__fixed_fallback() {
        let ceiling = GasCeiling::from_estimate(Err(anyhow!("dry run failed")), &config());

        assert_eq!(ceiling.limit, FALLBACK_SPIN_GAS_LIMIT);
        assert!(ceiling.is_fallback());
    }

    #[tokio::test]
    async fn settle__same_result_twice__ledger_mutated_once() {
        // given
        let mut processor = processor();
        let (mut reconciler, ledger) = reconciler(1000);
        processor.outstanding.push_back(outstanding(1, 100, false));

        // when
        let first = processor
            .settle(result(8, 250), HERO, DeliveryChannel::Receipt(tx(1)), &mut reconciler)
            .await
            .unwrap();
        let second = processor
            .settle(
                result(8, 250),
                HERO,
                DeliveryChannel::LiveSubscription,
                &mut reconciler,
            )
            .await
            .unwrap();

        // then
        assert!(matches!(first, SettleOutcome::Applied(ref report) if report.balance == 1150));
        assert_eq!(second, SettleOutcome::Duplicate(8));
        assert_eq!(ledger.writes(), 1);
        assert_eq!(reconciler.balance(), Some(1150));
    }

    #[tokio::test]
    async fn settle__no_outstanding_spin__unattributed_and_not_recorded() {
        // given
        let mut processor = processor();
        let (mut reconciler, ledger) = reconciler(1000);

        // when
        let outcome = processor
            .settle(result(3, 500), HERO, DeliveryChannel::LiveSubscription, &mut reconciler)
            .await
            .unwrap();

        // then
        assert_eq!(outcome, SettleOutcome::Unattributed(3));
        assert_eq!(ledger.writes(), 0);
        assert!(!processor.processed.contains(3));
    }

    #[tokio::test]
    async fn settle__receipt_result__charges_its_own_spin_only() {
        // given
        let mut processor = processor();
        let (mut reconciler, ledger) = reconciler(1000);
        processor.outstanding.push_back(outstanding(1, 100, false));
        processor.outstanding.push_back(outstanding(2, 500, false));

        // when
        let outcome = processor
            .settle(result(2, 0), HERO, DeliveryChannel::Receipt(tx(2)), &mut reconciler)
            .await
            .unwrap();

        // then
        let SettleOutcome::Applied(report) = outcome else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert_eq!(report.tx, tx(2));
        assert_eq!(report.charged_wager, 500);
        assert_eq!(ledger.amount(HERO), Some(500));
        assert_eq!(processor.outstanding(), 1);
        assert_eq!(processor.outstanding[0].tx, tx(1));
    }

    #[tokio::test]
    async fn settle__receipt_for_unknown_transaction__unattributed() {
        // given
        let mut processor = processor();
        let (mut reconciler, ledger) = reconciler(1000);
        processor.outstanding.push_back(outstanding(1, 100, false));

        // when
        let outcome = processor
            .settle(result(4, 0), HERO, DeliveryChannel::Receipt(tx(7)), &mut reconciler)
            .await
            .unwrap();

        // then
        assert_eq!(outcome, SettleOutcome::Unattributed(4));
        assert_eq!(ledger.writes(), 0);
        assert_eq!(processor.outstanding(), 1);
    }

    #[tokio::test]
    async fn settle__live_result__claims_oldest_outstanding_spin() {
        // given
        let mut processor = processor();
        let (mut reconciler, _) = reconciler(1000);
        processor.outstanding.push_back(outstanding(1, 100, false));
        processor.outstanding.push_back(outstanding(2, 500, false));

        // when
        let outcome = processor
            .settle(result(1, 0), HERO, DeliveryChannel::LiveSubscription, &mut reconciler)
            .await
            .unwrap();

        // then
        let SettleOutcome::Applied(report) = outcome else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert_eq!(report.tx, tx(1));
        assert_eq!(report.balance, 900);
        assert_eq!(processor.outstanding[0].tx, tx(2));
    }

    #[tokio::test]
    async fn settle__free_spin__charges_no_wager_and_consumes_credit() {
        // given
        let mut processor = processor();
        let (mut reconciler, _) = reconciler(1000);
        processor.set_free_spin_credits(2);
        processor.outstanding.push_back(outstanding(1, 100, true));

        // when
        let outcome = processor
            .settle(result(4, 40), HERO, DeliveryChannel::Receipt(tx(1)), &mut reconciler)
            .await
            .unwrap();

        // then
        let SettleOutcome::Applied(report) = outcome else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert_eq!(report.charged_wager, 0);
        assert_eq!(report.balance, 1040);
        assert_eq!(processor.free_spin_credits(), 1);
    }

    #[tokio::test]
    async fn settle__losing_spin__debits_wager_without_highlights() {
        // given
        let mut processor = processor();
        let (mut reconciler, ledger) = reconciler(1000);
        processor.outstanding.push_back(outstanding(1, 100, false));

        // when
        let outcome = processor
            .settle(result(5, 0), HERO, DeliveryChannel::Receipt(tx(1)), &mut reconciler)
            .await
            .unwrap();

        // then
        let SettleOutcome::Applied(report) = outcome else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert!(!report.is_win());
        assert!(report.highlighted.is_empty());
        assert_eq!(report.balance, 900);
        assert_eq!(ledger.reasons(), vec!["spin #5".to_string()]);
    }

    #[tokio::test]
    async fn settle__ledger_down__result_stays_processed() {
        // given
        let mut processor = processor();
        let (mut reconciler, ledger) = reconciler(1000);
        ledger.fail_writes(true);
        processor.outstanding.push_back(outstanding(1, 100, false));

        // when
        let outcome = processor
            .settle(result(6, 250), HERO, DeliveryChannel::Receipt(tx(1)), &mut reconciler)
            .await;

        // then
        assert!(matches!(outcome, Err(SpinError::LedgerWriteFailed(_))));
        assert!(processor.processed.contains(6));
    }

    #[tokio::test]
    async fn submit__binding_already_in_flight__binding_pending_without_signing() {
        // given
        let chain = FakeChainReader::new();
        let relay = ScriptedTransport::new("relay", TransportScript::Succeed)
            .yielding(3)
            .with_chain(chain.clone());
        let reader = SlotContractReader::new(chain.clone(), ContractId::from([9u8; 32]));
        let transports: Vec<Box<dyn BindingTransport>> = vec![Box::new(relay.clone())];
        let binder = CharacterBinder::new(Rc::new(reader), transports);
        let wallet = Rc::new(FakeWallet::new(player(), 0));
        let mut processor = SettlementProcessor::new(Rc::clone(&wallet), config());
        let (mut reconciler, ledger) = reconciler(1000);
        let ctx = SpinContext {
            wallet: player(),
            character: HERO,
        };

        // when
        let (binding, spin) = tokio::join!(
            binder.ensure_bound(player(), HERO),
            processor.submit(ctx, 100, &binder, &mut reconciler)
        );

        // then
        assert_eq!(binding.unwrap(), BindingStatus::Bound);
        assert_eq!(spin, Err(SpinError::BindingPending));
        assert_eq!(relay.calls(), 1);
        assert!(wallet.spin_calls().is_empty());
        assert_eq!(ledger.writes(), 0);
        assert_eq!(chain.active_character(player()), Some(HERO));
    }
}

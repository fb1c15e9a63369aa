//! The explicitly constructed session a UI drives: one wallet, one selected
//! character, and every cache tied to them.

use crate::{
    binder::{
        BindingStatus,
        BindingTransport,
        CharacterBinder,
        WalletSignedBinding,
    },
    config::SessionConfig,
    error::SpinError,
    events::RawLog,
    ports::{
        ChainReader,
        LedgerService,
        MirrorSync,
        SlotContractReader,
        WalletEvent,
        WalletGateway,
    },
    reconciler::Reconciler,
    settlement::{
        SettlementProcessor,
        SpinPhase,
        SpinReport,
    },
    types::{
        Character,
        CharacterId,
        SpinContext,
    },
};
use fuels::types::Address;
use std::rc::Rc;
use tokio::sync::{
    mpsc,
    watch,
};
use tracing::{
    info,
    trace,
    warn,
};


/// Pushed to the UI once per finished spin attempt or live settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpinOutcome {
    ResultReady(SpinReport),
    Error(SpinError),
    Cancelled,
}

impl From<&Result<SpinReport, SpinError>> for SpinOutcome {
    fn from(result: &Result<SpinReport, SpinError>) -> Self {
        match result {
            Ok(report) => SpinOutcome::ResultReady(report.clone()),
            Err(err) if err.is_cancellation() => SpinOutcome::Cancelled,
            Err(err) => SpinOutcome::Error(err.clone()),
        }
    }
}

pub struct SpinSession<W, R, L, M> {
    wallet: Rc<W>,
    reader: Rc<SlotContractReader<R>>,
    binder: CharacterBinder<R>,
    processor: SettlementProcessor<W>,
    reconciler: Reconciler<L, M>,
    connected: Option<Address>,
    characters: Vec<Character>,
    selected: Option<CharacterId>,
    outcomes: mpsc::UnboundedSender<SpinOutcome>,
}

impl<W, R, L, M> SpinSession<W, R, L, M>
where
    W: WalletGateway + 'static,
    R: ChainReader,
    L: LedgerService,
    M: MirrorSync,
{
    /// `relay`, when present, is tried before asking the wallet to sign a
    /// bind call.
    pub fn new(
        config: SessionConfig,
        wallet: Rc<W>,
        reader: R,
        ledger: L,
        mirror: M,
        relay: Option<Box<dyn BindingTransport>>,
    ) -> (Self, mpsc::UnboundedReceiver<SpinOutcome>) {
        let reader = Rc::new(SlotContractReader::new(reader, config.contract_id));
        let mut transports: Vec<Box<dyn BindingTransport>> = relay.into_iter().collect();
        transports.push(Box::new(WalletSignedBinding::new(Rc::clone(&wallet))));
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let session = Self {
            binder: CharacterBinder::new(Rc::clone(&reader), transports),
            processor: SettlementProcessor::new(Rc::clone(&wallet), config),
            reconciler: Reconciler::new(ledger, mirror),
            wallet,
            reader,
            connected: None,
            characters: Vec::new(),
            selected: None,
            outcomes,
        };
        (session, receiver)
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn selected(&self) -> Option<CharacterId> {
        self.selected
    }

    pub fn free_spin_credits(&self) -> u32 {
        self.processor.free_spin_credits()
    }

    pub fn balance_watch(&self) -> watch::Receiver<Option<u64>> {
        self.reconciler.subscribe()
    }

    pub fn phase_watch(&self) -> watch::Receiver<SpinPhase> {
        self.processor.phase()
    }

    /// Loads the connected wallet's characters.
    pub async fn connect(&mut self) -> Result<&[Character], SpinError> {
        let wallet = self.wallet.address().ok_or(SpinError::WalletDisconnected)?;
        let characters = self
            .reader
            .characters_of(&wallet)
            .await
            .map_err(|err| SpinError::Provider(format!("{err:#}")))?;
        info!(%wallet, characters = characters.len(), "wallet connected");
        self.connected = Some(wallet);
        self.characters = characters;
        Ok(&self.characters)
    }

    /// Makes `character` the one wagers are placed for, loads its balance
    /// and brings the on-chain binding in line.
    pub async fn select_character(
        &mut self,
        character: CharacterId,
    ) -> Result<BindingStatus, SpinError> {
        let wallet = self.connected.ok_or(SpinError::WalletDisconnected)?;
        if !self.characters.iter().any(|owned| owned.id == character) {
            return Err(SpinError::UnknownCharacter(character));
        }
        if self.selected != Some(character) {
            info!(%wallet, %character, "character selected");
            self.selected = Some(character);
            self.reconciler.set_active(character);
        }
        self.refresh().await?;
        self.binder.ensure_bound(wallet, character).await
    }

    pub async fn ensure_binding(&self) -> Result<BindingStatus, SpinError> {
        let (wallet, character) = self.context().map(|ctx| (ctx.wallet, ctx.character))?;
        self.binder.ensure_bound(wallet, character).await
    }

    /// Places one wager and reports the outcome both as the return value and
    /// on the outcome stream.
    pub async fn submit(&mut self, wager: u64) -> Result<SpinReport, SpinError> {
        let result = self.try_submit(wager).await;
        self.emit(SpinOutcome::from(&result));
        result
    }

    async fn try_submit(&mut self, wager: u64) -> Result<SpinReport, SpinError> {
        let ctx = self.context()?;
        if self.wallet.address() != Some(ctx.wallet) {
            return Err(SpinError::WalletDisconnected);
        }
        self.reconciler.sync_mirror().await;
        let result = self
            .processor
            .submit(ctx, wager, &self.binder, &mut self.reconciler)
            .await;
        let late = self.processor.take_late_reports();
        let settled = result.is_ok() || !late.is_empty();
        for report in late {
            self.emit(SpinOutcome::ResultReady(report));
        }
        if settled {
            self.push_mirror().await;
        }
        result
    }

    /// Manual refresh: re-reads the authoritative balance and the contract's
    /// view of the account, then retries any pending mirror sync.
    pub async fn refresh(&mut self) -> Result<(), SpinError> {
        let ctx = self.context()?;
        self.reconciler
            .resync(ctx.character)
            .await
            .map_err(|err| SpinError::LedgerUnavailable(format!("{err:#}")))?;
        match self.reader.account_state(&ctx.wallet, ctx.character).await {
            Ok(state) => {
                if state.active_character != Some(ctx.character) {
                    self.binder.invalidate(&ctx.wallet);
                }
                self.processor.set_free_spin_credits(state.free_spins);
                self.reconciler
                    .observe_mirror(ctx.character, state.mirrored_gold);
            }
            Err(err) => warn!(?err, wallet = %ctx.wallet, "reading account state failed"),
        }
        self.push_mirror().await;
        Ok(())
    }

    /// Account changes and disconnects drop the whole session state; call
    /// [`Self::connect`] again afterwards.
    pub fn handle_wallet_event(&mut self, event: WalletEvent) {
        match event {
            WalletEvent::AccountChanged(Some(address)) if self.connected == Some(address) => {}
            WalletEvent::AccountChanged(_) | WalletEvent::Disconnected => self.disconnect(),
            WalletEvent::ChainChanged(chain_id) => {
                info!(chain_id, "wallet switched network");
                self.binder.reset();
            }
        }
    }

    pub fn disconnect(&mut self) {
        info!(wallet = ?self.connected, "session reset");
        self.connected = None;
        self.characters.clear();
        self.selected = None;
        self.binder.reset();
        self.processor.reset();
        self.reconciler.clear();
    }

    pub fn attach_live_feed(&mut self, feed: mpsc::UnboundedReceiver<RawLog>) {
        self.processor.attach_live_feed(feed);
    }

    /// Settles whatever the live feed has buffered. Returns how many results
    /// were applied.
    pub async fn process_live_events(&mut self) -> usize {
        let Ok(ctx) = self.context() else {
            return 0;
        };
        let results = self
            .processor
            .drain_live_events(ctx, &mut self.reconciler)
            .await;
        let applied = results.iter().filter(|result| result.is_ok()).count();
        for result in &results {
            self.emit(SpinOutcome::from(result));
        }
        if applied > 0 {
            self.push_mirror().await;
        }
        applied
    }

    /// Best effort; a failed push stays stale until the next sync point.
    async fn push_mirror(&mut self) {
        let report = self.reconciler.sync_mirror().await;
        if report.failed > 0 {
            warn!(failed = report.failed, "on-chain mirror still out of date");
        }
    }

    fn context(&self) -> Result<SpinContext, SpinError> {
        let wallet = self.connected.ok_or(SpinError::WalletDisconnected)?;
        let character = self.selected.ok_or(SpinError::NoCharacterSelected)?;
        Ok(SpinContext { wallet, character })
    }

    fn emit(&self, outcome: SpinOutcome) {
        if self.outcomes.send(outcome).is_err() {
            trace!("outcome receiver dropped");
        }
    }
}

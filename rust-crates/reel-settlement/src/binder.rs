//! Keeps the wallet's on-chain active character in step with the locally
//! selected one. No wager is submitted until [`CharacterBinder::ensure_bound`]
//! reports [`BindingStatus::Bound`].

use crate::{
    error::{
        SignerError,
        SpinError,
    },
    ports::{
        ChainReader,
        SlotContractReader,
        WalletGateway,
    },
    types::CharacterId,
};
use anyhow::anyhow;
use fuels::types::Address;
use futures::{
    FutureExt,
    future::LocalBoxFuture,
};
use std::{
    cell::RefCell,
    collections::{
        HashMap,
        HashSet,
    },
    rc::Rc,
};
use thiserror::Error;
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Debug, Error)]
pub enum BindingTransportError {
    #[error("binding signature was cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// One way of getting a bind call onto the chain.
pub trait BindingTransport {
    fn name(&self) -> &'static str;

    fn bind<'a>(
        &'a self,
        wallet: Address,
        character: CharacterId,
    ) -> LocalBoxFuture<'a, Result<(), BindingTransportError>>;
}

/// Falls back to asking the player to sign the bind call.
pub struct WalletSignedBinding<W> {
    wallet: Rc<W>,
}

impl<W> WalletSignedBinding<W> {
    pub fn new(wallet: Rc<W>) -> Self {
        Self { wallet }
    }
}

impl<W: WalletGateway> BindingTransport for WalletSignedBinding<W> {
    fn name(&self) -> &'static str {
        "wallet"
    }

    fn bind<'a>(
        &'a self,
        wallet: Address,
        character: CharacterId,
    ) -> LocalBoxFuture<'a, Result<(), BindingTransportError>> {
        async move {
            if self.wallet.address() != Some(wallet) {
                return Err(anyhow!("connected account is not {wallet}").into());
            }
            match self.wallet.bind_active_character(character).await {
                Ok(tx) => {
                    debug!(%wallet, %character, %tx, "bind transaction confirmed");
                    Ok(())
                }
                Err(SignerError::Rejected) => Err(BindingTransportError::Cancelled),
                Err(err) => Err(anyhow::Error::from(err).into()),
            }
        }
        .boxed_local()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingStatus {
    Bound,
    /// Another binding attempt for this wallet is still running.
    AlreadyInFlight,
    /// The player cancelled the signature; safe to retry.
    NotYetBound,
}

pub struct CharacterBinder<R> {
    reader: Rc<SlotContractReader<R>>,
    transports: Vec<Box<dyn BindingTransport>>,
    verified: RefCell<HashMap<Address, CharacterId>>,
    in_flight: RefCell<HashSet<Address>>,
}

impl<R: ChainReader> CharacterBinder<R> {
    /// `transports` are tried in order until one succeeds.
    pub fn new(
        reader: Rc<SlotContractReader<R>>,
        transports: Vec<Box<dyn BindingTransport>>,
    ) -> Self {
        Self {
            reader,
            transports,
            verified: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    pub fn is_verified(&self, wallet: &Address, character: CharacterId) -> bool {
        self.verified.borrow().get(wallet) == Some(&character)
    }

    pub async fn ensure_bound(
        &self,
        wallet: Address,
        character: CharacterId,
    ) -> Result<BindingStatus, SpinError> {
        if self.is_verified(&wallet, character) {
            return Ok(BindingStatus::Bound);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, wallet) else {
            debug!(%wallet, "binding already in flight");
            return Ok(BindingStatus::AlreadyInFlight);
        };

        let on_chain = self.reader.active_character(&wallet).await.map_err(|err| {
            warn!(?err, %wallet, "reading active character failed");
            SpinError::BindingFailed(format!("{err:#}"))
        })?;
        if on_chain == Some(character) {
            self.remember(wallet, character);
            return Ok(BindingStatus::Bound);
        }

        info!(%wallet, %character, current = ?on_chain, "binding active character");
        let mut failures = Vec::new();
        for transport in &self.transports {
            match transport.bind(wallet, character).await {
                Ok(()) => {
                    info!(%wallet, %character, transport = transport.name(), "character bound");
                    self.remember(wallet, character);
                    return Ok(BindingStatus::Bound);
                }
                Err(BindingTransportError::Cancelled) => {
                    info!(%wallet, %character, "binding signature cancelled");
                    return Ok(BindingStatus::NotYetBound);
                }
                Err(BindingTransportError::Failed(err)) => {
                    warn!(?err, transport = transport.name(), "binding transport failed");
                    failures.push(format!("{}: {err:#}", transport.name()));
                }
            }
        }
        if failures.is_empty() {
            failures.push("no binding transport configured".to_string());
        }
        Err(SpinError::BindingFailed(failures.join("; ")))
    }

    pub fn invalidate(&self, wallet: &Address) {
        self.verified.borrow_mut().remove(wallet);
    }

    pub fn reset(&self) {
        self.verified.borrow_mut().clear();
    }

    fn remember(&self, wallet: Address, character: CharacterId) {
        self.verified.borrow_mut().insert(wallet, character);
    }
}

/// Marks a wallet as binding until dropped.
struct InFlightGuard<'a> {
    set: &'a RefCell<HashSet<Address>>,
    wallet: Address,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a RefCell<HashSet<Address>>, wallet: Address) -> Option<Self> {
        set.borrow_mut()
            .insert(wallet)
            .then(|| Self { set, wallet })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.wallet);
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        FakeChainReader,
        FakeWallet,
        ScriptedTransport,
        TransportScript,
    };
    use fuels::types::ContractId;

    const HERO: CharacterId = CharacterId(3);

    fn wallet() -> Address {
        Address::from([1u8; 32])
    }

    fn binder_with(
        chain: &FakeChainReader,
        transports: Vec<Box<dyn BindingTransport>>,
    ) -> CharacterBinder<FakeChainReader> {
        let reader = SlotContractReader::new(chain.clone(), ContractId::from([9u8; 32]));
        CharacterBinder::new(Rc::new(reader), transports)
    }

    #[tokio::test]
    async fn ensure_bound__already_active_on_chain__no_state_change() {
        // given
        let chain = FakeChainReader::new();
        chain.set_active_character(wallet(), Some(HERO));
        let relay = ScriptedTransport::new("relay", TransportScript::Succeed);
        let binder = binder_with(&chain, vec![Box::new(relay.clone())]);

        // when
        let status = binder.ensure_bound(wallet(), HERO).await.unwrap();

        // then
        assert_eq!(status, BindingStatus::Bound);
        assert_eq!(relay.calls(), 0);
        assert!(binder.is_verified(&wallet(), HERO));
    }

    #[tokio::test]
    async fn ensure_bound__verified_wallet__skips_chain_read() {
        // given
        let chain = FakeChainReader::new();
        chain.set_active_character(wallet(), Some(HERO));
        let binder = binder_with(&chain, vec![]);
        binder.ensure_bound(wallet(), HERO).await.unwrap();

        // when
        binder.ensure_bound(wallet(), HERO).await.unwrap();

        // then
        assert_eq!(chain.batch_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn ensure_bound__two_simultaneous_triggers__one_state_changing_call() {
        // given
        let chain = FakeChainReader::new();
        let relay = ScriptedTransport::new("relay", TransportScript::Succeed).yielding(3);
        let binder = binder_with(&chain, vec![Box::new(relay.clone())]);

        // when
        let (first, second) = tokio::join!(
            binder.ensure_bound(wallet(), HERO),
            binder.ensure_bound(wallet(), HERO)
        );

        // then
        assert_eq!(first.unwrap(), BindingStatus::Bound);
        assert_eq!(second.unwrap(), BindingStatus::AlreadyInFlight);
        assert_eq!(relay.calls(), 1);
    }

    #[tokio::test]
    async fn ensure_bound__relay_fails__falls_back_to_wallet_signature() {
        // given
        let chain = FakeChainReader::new();
        let relay = ScriptedTransport::new("relay", TransportScript::Fail("relay down"));
        let wallet_gateway = Rc::new(FakeWallet::new(wallet(), 0).with_chain(chain.clone()));
        let binder = binder_with(
            &chain,
            vec![
                Box::new(relay.clone()),
                Box::new(WalletSignedBinding::new(wallet_gateway.clone())),
            ],
        );

        // when
        let status = binder.ensure_bound(wallet(), HERO).await.unwrap();

        // then
        assert_eq!(status, BindingStatus::Bound);
        assert_eq!(relay.calls(), 1);
        assert_eq!(wallet_gateway.bind_calls(), 1);
    }

    #[tokio::test]
    async fn ensure_bound__relay_cancelled__stops_without_wallet_prompt() {
        // given
        let chain = FakeChainReader::new();
        let relay = ScriptedTransport::new("relay", TransportScript::Cancel);
        let wallet_gateway = Rc::new(FakeWallet::new(wallet(), 0).with_chain(chain.clone()));
        let binder = binder_with(
            &chain,
            vec![
                Box::new(relay.clone()),
                Box::new(WalletSignedBinding::new(wallet_gateway.clone())),
            ],
        );

        // when
        let status = binder.ensure_bound(wallet(), HERO).await.unwrap();

        // then
        assert_eq!(status, BindingStatus::NotYetBound);
        assert_eq!(wallet_gateway.bind_calls(), 0);
        assert!(!binder.is_verified(&wallet(), HERO));
    }

    #[tokio::test]
    async fn ensure_bound__signature_cancelled__not_yet_bound_and_retryable() {
        // given
        let chain = FakeChainReader::new();
        let wallet_gateway = Rc::new(FakeWallet::new(wallet(), 0));
        wallet_gateway.reject_binds(true);
        let binder = binder_with(
            &chain,
            vec![Box::new(WalletSignedBinding::new(wallet_gateway.clone()))],
        );

        // when
        let first = binder.ensure_bound(wallet(), HERO).await.unwrap();
        wallet_gateway.reject_binds(false);
        let second = binder.ensure_bound(wallet(), HERO).await.unwrap();

        // then
        assert_eq!(first, BindingStatus::NotYetBound);
        assert_eq!(second, BindingStatus::Bound);
        assert_eq!(wallet_gateway.bind_calls(), 2);
    }

    #[tokio::test]
    async fn ensure_bound__every_transport_fails__binding_failed() {
        let chain = FakeChainReader::new();
        let relay = ScriptedTransport::new("relay", TransportScript::Fail("relay down"));
        let binder = binder_with(&chain, vec![Box::new(relay)]);

        let result = binder.ensure_bound(wallet(), HERO).await;

        assert!(matches!(result, Err(SpinError::BindingFailed(msg)) if msg.contains("relay down")));
    }

    #[tokio::test]
    async fn ensure_bound__chain_unreadable__binding_failed() {
        let chain = FakeChainReader::new();
        chain.fail_reads(true);
        let binder = binder_with(&chain, vec![]);

        let result = binder.ensure_bound(wallet(), HERO).await;

        assert!(matches!(result, Err(SpinError::BindingFailed(_))));
    }

    #[tokio::test]
    async fn invalidate__forces_fresh_read() {
        // given
        let chain = FakeChainReader::new();
        chain.set_active_character(wallet(), Some(HERO));
        let binder = binder_with(&chain, vec![]);
        binder.ensure_bound(wallet(), HERO).await.unwrap();

        // when
        binder.invalidate(&wallet());
        binder.ensure_bound(wallet(), HERO).await.unwrap();

        // then
        assert_eq!(chain.batch_sizes(), vec![1, 1]);
    }
}

//! HTTP client for the game server that owns the authoritative gold ledger and
//! holds the operational keys for mirror writes and relayed binds.

use crate::{
    binder::{
        BindingTransport,
        BindingTransportError,
    },
    ports::{
        LedgerService,
        MirrorSync,
    },
    types::{
        CharacterId,
        GoldLedgerEntry,
    },
};
use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::{
    DateTime,
    Utc,
};
use fuels::types::Address;
use futures::{
    FutureExt,
    future::LocalBoxFuture,
};
use reqwest::Response;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone)]
pub struct GameServerClient {
    base_url: String,
    http: reqwest::Client,
}

impl GameServerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for game server")?;
        Ok(Self { base_url, http })
    }

    fn gold_url(&self, character: CharacterId) -> String {
        format!("{}/gold/{}", self.base_url, character)
    }

    fn bind_url(&self, character: CharacterId) -> String {
        format!("{}/characters/{}/bind", self.base_url, character)
    }

    pub async fn gold_entry(&self, character: CharacterId) -> Result<GoldLedgerEntry> {
        let res = self
            .http
            .get(self.gold_url(character))
            .send()
            .await
            .context("game server request failed")?;
        let res = ensure_success(res, "fetching gold").await?;
        let dto: GoldEntryDto = res.json().await.context("invalid gold entry payload")?;
        Ok(dto.into())
    }

    pub async fn post_delta(
        &self,
        character: CharacterId,
        delta: i64,
        reason: &str,
    ) -> Result<GoldLedgerEntry> {
        let url = format!("{}/delta", self.gold_url(character));
        let res = self
            .http
            .post(url)
            .json(&DeltaRequest { delta, reason })
            .send()
            .await
            .context("game server request failed")?;
        let res = ensure_success(res, "applying gold delta").await?;
        let dto: GoldEntryDto = res.json().await.context("invalid gold entry payload")?;
        Ok(dto.into())
    }

    pub async fn post_mirror(&self, character: CharacterId, amount: u64) -> Result<()> {
        let url = format!("{}/mirror", self.gold_url(character));
        let res = self
            .http
            .post(url)
            .json(&MirrorRequest { amount })
            .send()
            .await
            .context("game server request failed")?;
        ensure_success(res, "syncing on-chain gold").await?;
        Ok(())
    }

    pub async fn relay_bind(&self, wallet: Address, character: CharacterId) -> Result<()> {
        let res = self
            .http
            .post(self.bind_url(character))
            .json(&BindRequest {
                wallet: wallet.to_string(),
            })
            .send()
            .await
            .context("game server request failed")?;
        ensure_success(res, "relaying character binding").await?;
        Ok(())
    }
}

impl LedgerService for GameServerClient {
    async fn apply_delta(
        &self,
        character: CharacterId,
        delta: i64,
        reason: &str,
    ) -> Result<GoldLedgerEntry> {
        self.post_delta(character, delta, reason).await
    }

    async fn fetch_entry(&self, character: CharacterId) -> Result<GoldLedgerEntry> {
        self.gold_entry(character).await
    }
}

impl MirrorSync for GameServerClient {
    async fn push_mirror(&self, character: CharacterId, amount: u64) -> Result<()> {
        self.post_mirror(character, amount).await
    }
}

impl BindingTransport for GameServerClient {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn bind<'a>(
        &'a self,
        wallet: Address,
        character: CharacterId,
    ) -> LocalBoxFuture<'a, Result<(), BindingTransportError>> {
        async move {
            self.relay_bind(wallet, character)
                .await
                .map_err(BindingTransportError::Failed)
        }
        .boxed_local()
    }
}

async fn ensure_success(res: Response, action: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res
        .text()
        .await
        .unwrap_or_else(|_| "<unavailable body>".to_string());
    Err(anyhow!(
        "game server responded with {status} when {action}: {body}"
    ))
}

#[derive(Serialize)]
struct DeltaRequest<'a> {
    delta: i64,
    reason: &'a str,
}

#[derive(Serialize)]
struct MirrorRequest {
    amount: u64,
}

#[derive(Serialize)]
struct BindRequest {
    wallet: String,
}

#[derive(Deserialize)]
struct GoldEntryDto {
    amount: u64,
    #[serde(default, alias = "lastReason")]
    last_reason: String,
    #[serde(default, alias = "updatedAt")]
    updated_at: Option<DateTime<Utc>>,
}

impl From<GoldEntryDto> for GoldLedgerEntry {
    fn from(dto: GoldEntryDto) -> Self {
        GoldLedgerEntry {
            amount: dto.amount,
            last_reason: dto.last_reason,
            updated_at: dto.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use serde_json::json;

    #[test]
    fn new__trailing_slash__trimmed_from_urls() {
        let client = GameServerClient::new("http://localhost:8080/api/").unwrap();

        assert_eq!(client.gold_url(CharacterId(4)), "http://localhost:8080/api/gold/4");
        assert_eq!(
            client.bind_url(CharacterId(4)),
            "http://localhost:8080/api/characters/4/bind"
        );
    }

    #[test]
    fn gold_entry_dto__camel_case_payload__converted() {
        // given
        let payload = json!({
            "amount": 1150,
            "lastReason": "spin #9",
            "updatedAt": "2025-01-02T03:04:05Z",
        });

        // when
        let dto: GoldEntryDto = serde_json::from_value(payload).unwrap();
        let entry = GoldLedgerEntry::from(dto);

        // then
        assert_eq!(entry.amount, 1150);
        assert_eq!(entry.last_reason, "spin #9");
        assert_eq!(entry.updated_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn delta_request__serializes_signed_delta() {
        let body = serde_json::to_value(DeltaRequest {
            delta: -100,
            reason: "spin #3",
        })
        .unwrap();

        assert_eq!(body, json!({"delta": -100, "reason": "spin #3"}));
    }
}

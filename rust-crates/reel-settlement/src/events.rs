//! Boundary between loosely typed contract logs and the engine's events.

use crate::{
    paylines::BOARD_LEN,
    types::{
        FreeSpinsAward,
        SpinResult,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use fuels::types::{
    Address,
    ContractId,
};
use serde::{
    Deserialize,
    Deserializer,
    de::DeserializeOwned,
};
use std::str::FromStr;

pub const SPIN_SETTLED: &str = "SpinSettled";
pub const FREE_SPINS_AWARDED: &str = "FreeSpinsAwarded";

/// A decoded-but-untyped log entry as handed over by the provider or the live
/// subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct RawLog {
    pub emitter: ContractId,
    pub name: String,
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractEvent {
    SpinSettled(SpinResult),
    FreeSpinsAwarded(FreeSpinsAward),
}

impl ContractEvent {
    pub fn player(&self) -> &Address {
        match self {
            ContractEvent::SpinSettled(result) => &result.player,
            ContractEvent::FreeSpinsAwarded(award) => &award.player,
        }
    }
}

/// Logs from other contracts, unknown event names and malformed payloads are
/// skipped.
pub fn parse_event_log(contract: &ContractId, log: &RawLog) -> Option<ContractEvent> {
    if log.emitter != *contract {
        tracing::trace!(emitter = %log.emitter, "skipping log from foreign contract");
        return None;
    }
    let parsed = match log.name.as_str() {
        SPIN_SETTLED => decode::<SpinSettledDto>(log)
            .and_then(|dto| dto.into_result().map(ContractEvent::SpinSettled)),
        FREE_SPINS_AWARDED => decode::<FreeSpinsAwardedDto>(log)
            .and_then(|dto| dto.into_award().map(ContractEvent::FreeSpinsAwarded)),
        other => {
            tracing::trace!(event = other, "skipping unrecognized log");
            return None;
        }
    };
    if parsed.is_none() {
        tracing::debug!(event = %log.name, data = %log.data, "skipping malformed log");
    }
    parsed
}

pub fn parse_event_logs(contract: &ContractId, logs: &[RawLog]) -> Vec<ContractEvent> {
    logs.iter()
        .filter_map(|log| parse_event_log(contract, log))
        .collect()
}

fn decode<T: DeserializeOwned>(log: &RawLog) -> Option<T> {
    serde_json::from_value(log.data.clone()).ok()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpinSettledDto {
    #[serde(deserialize_with = "flexible_u64")]
    sequence_number: u64,
    player: String,
    #[serde(deserialize_with = "flexible_u64")]
    payout_amount: u64,
    #[serde(default, deserialize_with = "flexible_u64")]
    jackpot_amount: u64,
    board: Vec<u8>,
    #[serde(default)]
    winning_line_indices: Vec<u8>,
    #[serde(default)]
    is_bonus_round: bool,
    #[serde(deserialize_with = "flexible_i64")]
    timestamp: i64,
}

impl SpinSettledDto {
    fn into_result(self) -> Option<SpinResult> {
        if self.board.len() != BOARD_LEN {
            return None;
        }
        Some(SpinResult {
            sequence: self.sequence_number,
            player: Address::from_str(&self.player).ok()?,
            payout: self.payout_amount,
            jackpot: self.jackpot_amount,
            board: self.board,
            winning_lines: self.winning_line_indices,
            is_bonus_round: self.is_bonus_round,
            timestamp: DateTime::<Utc>::from_timestamp(self.timestamp, 0)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreeSpinsAwardedDto {
    #[serde(deserialize_with = "flexible_u64")]
    sequence_number: u64,
    player: String,
    count: u32,
}

impl FreeSpinsAwardedDto {
    fn into_award(self) -> Option<FreeSpinsAward> {
        Some(FreeSpinsAward {
            sequence: self.sequence_number,
            player: Address::from_str(&self.player).ok()?,
            count: self.count,
        })
    }
}

/// Providers hand 64-bit integers over either as JSON numbers or as decimal
/// strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

fn flexible_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("{n} is not a u64"))),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn flexible_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("{n} is not an i64"))),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use serde_json::json;

    fn contract() -> ContractId {
        ContractId::from([9u8; 32])
    }

    fn player_hex() -> String {
        format!("0x{}", "ab".repeat(32))
    }

    fn settled_log(data: serde_json::Value) -> RawLog {
        RawLog {
            emitter: contract(),
            name: SPIN_SETTLED.to_string(),
            data,
        }
    }

    #[test]
    fn parse_event_log__spin_settled__decodes_all_fields() {
        // given
        let log = settled_log(json!({
            "sequenceNumber": "42",
            "player": player_hex(),
            "payoutAmount": 250,
            "jackpotAmount": 0,
            "board": [1, 1, 1, 2, 3, 4, 5, 6, 7, 8, 0, 1, 2, 3, 4],
            "winningLineIndices": [0],
            "isBonusRound": true,
            "timestamp": 1_700_000_000,
        }));

        // when
        let event = parse_event_log(&contract(), &log);

        // then
        let Some(ContractEvent::SpinSettled(result)) = event else {
            panic!("expected a settlement, got {event:?}");
        };
        assert_eq!(result.sequence, 42);
        assert_eq!(result.player, Address::from([0xab; 32]));
        assert_eq!(result.payout, 250);
        assert_eq!(result.winning_lines, vec![0]);
        assert!(result.is_bonus_round);
        assert_eq!(result.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parse_event_log__short_board__is_skipped() {
        let log = settled_log(json!({
            "sequenceNumber": 1,
            "player": player_hex(),
            "payoutAmount": 0,
            "board": [1, 2, 3],
            "timestamp": 0,
        }));

        assert_eq!(parse_event_log(&contract(), &log), None);
    }

    #[test]
    fn parse_event_log__foreign_contract__is_skipped() {
        let mut log = settled_log(json!({}));
        log.emitter = ContractId::from([1u8; 32]);

        assert_eq!(parse_event_log(&contract(), &log), None);
    }

    #[test]
    fn parse_event_logs__mixed_batch__keeps_known_events_only() {
        // given
        let logs = vec![
            RawLog {
                emitter: contract(),
                name: "Transfer".to_string(),
                data: json!({"amount": 5}),
            },
            RawLog {
                emitter: contract(),
                name: FREE_SPINS_AWARDED.to_string(),
                data: json!({"sequenceNumber": 3, "player": player_hex(), "count": 5}),
            },
            settled_log(json!({"garbage": true})),
        ];

        // when
        let events = parse_event_logs(&contract(), &logs);

        // then
        assert_eq!(
            events,
            vec![ContractEvent::FreeSpinsAwarded(FreeSpinsAward {
                sequence: 3,
                player: Address::from([0xab; 32]),
                count: 5,
            })]
        );
    }
}

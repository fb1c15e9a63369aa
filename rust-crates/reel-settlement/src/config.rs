use anyhow::{
    Context,
    anyhow,
};
use deployments::DeploymentRecord;
use fuels::types::ContractId;
use std::{
    str::FromStr,
    time::Duration,
};

/// Lowest gas ceiling ever sent with a spin, however small the estimate.
pub const MIN_SPIN_GAS_LIMIT: u64 = 400_000;
/// Ceiling used when the provider cannot estimate the spin call.
pub const FALLBACK_SPIN_GAS_LIMIT: u64 = 2_500_000;
/// Jackpot, bonus and free-spin branches cost more than the estimated path.
pub const GAS_SAFETY_MULTIPLIER: u64 = 2;
pub const PROCESSED_HIGH_WATER: usize = 50;
pub const PROCESSED_RETAIN: usize = 25;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub contract_id: ContractId,
    pub required_chain_id: u64,
    pub gas_multiplier: u64,
    pub min_gas_limit: u64,
    pub fallback_gas_limit: u64,
    /// `None` waits for the provider indefinitely.
    pub confirmation_timeout: Option<Duration>,
    pub processed_high_water: usize,
    pub processed_retain: usize,
}

impl SessionConfig {
    pub fn new(contract_id: ContractId, required_chain_id: u64) -> Self {
        Self {
            contract_id,
            required_chain_id,
            gas_multiplier: GAS_SAFETY_MULTIPLIER,
            min_gas_limit: MIN_SPIN_GAS_LIMIT,
            fallback_gas_limit: FALLBACK_SPIN_GAS_LIMIT,
            confirmation_timeout: None,
            processed_high_water: PROCESSED_HIGH_WATER,
            processed_retain: PROCESSED_RETAIN,
        }
    }

    pub fn from_deployment(record: &DeploymentRecord) -> anyhow::Result<Self> {
        let contract_id = parse_contract_id(&record.contract_id)
            .with_context(|| format!("parsing contract id of {}", record.network_url))?;
        let mut config = Self::new(contract_id, record.chain_id);
        config.confirmation_timeout =
            record.confirmation_timeout_secs.map(Duration::from_secs);
        Ok(config)
    }
}

pub fn parse_contract_id(raw: &str) -> anyhow::Result<ContractId> {
    let trimmed = raw.trim();
    ContractId::from_str(trimmed)
        .map_err(|e| anyhow!("Failed to parse contract id '{raw}': {e:?}"))
}

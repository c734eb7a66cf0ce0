//! Configuration management for minichain

use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,
    /// Address of a bootstrap registry (`host:port`) for the port exchange.
    #[serde(default)]
    pub bootstrap_addr: Option<String>,
    /// Peers to dial directly at startup (`host:port`).
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Required leading zero bits on a block hash.
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_block_reward")]
    pub block_reward: u64,
    /// Transactions per block. Fixes the block wire size, so every node on
    /// a network must use the same value.
    #[serde(default = "default_txs_per_block")]
    pub txs_per_block: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_mining_enabled")]
    pub enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            p2p_port: default_p2p_port(),
            bootstrap_addr: None,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            block_reward: default_block_reward(),
            txs_per_block: default_txs_per_block(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: default_mining_enabled(),
        }
    }
}

fn default_p2p_port() -> u16 {
    8444
}

fn default_difficulty() -> u32 {
    20
}

fn default_block_reward() -> u64 {
    100
}

fn default_txs_per_block() -> usize {
    100
}

fn default_mining_enabled() -> bool {
    false
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file is absent.
pub fn load_config(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)
            .map_err(|e| ChainError::Config(format!("failed to parse {path}: {e}")))?
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.consensus.difficulty > 256 {
        return Err(ChainError::Config(
            "consensus.difficulty cannot exceed 256 bits".to_string(),
        ));
    }
    if config.consensus.txs_per_block == 0 {
        return Err(ChainError::Config(
            "consensus.txs_per_block must be at least 1".to_string(),
        ));
    }
    Ok(())
}

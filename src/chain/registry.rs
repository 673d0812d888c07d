use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::config::Settings;

/// Static description of a chain the engine can automate positions on.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub name: &'static str,
    pub default_rpc_url: &'static str,
    /// OP-stack rollups charge an L1 data fee on top of execution gas.
    pub op_stack: bool,
    pub multicall: bool,
    /// Asset platform id used by the historical price feed.
    pub price_platform: &'static str,
}

lazy_static! {
    static ref SUPPORTED_CHAINS: HashMap<u64, ChainInfo> = {
        let chains = [
            ChainInfo { chain_id: 1, name: "ethereum", default_rpc_url: "https://eth.llamarpc.com", op_stack: false, multicall: true, price_platform: "ethereum" },
            ChainInfo { chain_id: 10, name: "optimism", default_rpc_url: "https://mainnet.optimism.io", op_stack: true, multicall: true, price_platform: "optimistic-ethereum" },
            ChainInfo { chain_id: 56, name: "bnb", default_rpc_url: "https://bsc-dataseed.bnbchain.org", op_stack: false, multicall: true, price_platform: "binance-smart-chain" },
            ChainInfo { chain_id: 137, name: "polygon", default_rpc_url: "https://polygon-rpc.com", op_stack: false, multicall: true, price_platform: "polygon-pos" },
            ChainInfo { chain_id: 8453, name: "base", default_rpc_url: "https://mainnet.base.org", op_stack: true, multicall: true, price_platform: "base" },
            ChainInfo { chain_id: 42161, name: "arbitrum", default_rpc_url: "https://arb1.arbitrum.io/rpc", op_stack: false, multicall: true, price_platform: "arbitrum-one" },
        ];
        chains.into_iter().map(|c| (c.chain_id, c)).collect()
    };
}

pub fn chain_info(chain_id: u64) -> Option<&'static ChainInfo> {
    SUPPORTED_CHAINS.get(&chain_id)
}

/// Supported chain ids in ascending order.
pub fn supported_chain_ids() -> Vec<u64> {
    let mut ids: Vec<u64> = SUPPORTED_CHAINS.keys().copied().collect();
    ids.sort_unstable();
    ids
}

pub fn is_supported(chain_id: u64) -> bool {
    SUPPORTED_CHAINS.contains_key(&chain_id)
}

/// RPC endpoint for the chain, preferring a configured override.
pub fn rpc_url(chain_id: u64, settings: &Settings) -> Option<String> {
    settings
        .rpc_url_override(chain_id)
        .map(str::to_string)
        .or_else(|| chain_info(chain_id).map(|info| info.default_rpc_url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_chains() {
        assert!(is_supported(1));
        assert!(chain_info(10).unwrap().op_stack);
        assert!(!chain_info(42161).unwrap().op_stack);
        assert!(!is_supported(999_999));
        assert_eq!(supported_chain_ids(), vec![1, 10, 56, 137, 8453, 42161]);
    }

    #[test]
    fn test_rpc_url_override() {
        let mut settings = Settings::default();
        settings
            .rpc_url_overrides
            .insert("8453".to_string(), "http://localhost:8545".to_string());
        assert_eq!(rpc_url(8453, &settings).as_deref(), Some("http://localhost:8545"));
        assert_eq!(rpc_url(1, &settings).as_deref(), Some("https://eth.llamarpc.com"));
        assert_eq!(rpc_url(12345, &settings), None);
    }
}

//! Spot allocation strategies
//!
//! A strategy answers three questions for a node pool:
//!
//! - Is the quoted spot price acceptable?
//! - Which nodes of the pool should ask for spot capacity?
//! - Which availability zone should a spot node go to?
//!
//! ## Strategies
//!
//! | Strategy | Price ceiling | Spot share | Zone |
//! |---|---|---|---|
//! | **Default** | `max_spot_price` (unset = any price) | `spot_percentage` (unset = 100) | cheapest |
//! | **Aggressive** | `max_spot_price * 1.2` (unset = any price) | every node | cheapest |
//! | **Conservative** | `max_spot_price * 0.8` (unset = refuse) | `spot_percentage - 10` (unset = 50) | median price |
//!
//! Pool partitioning is index based: node `i` of `n` is a spot node iff
//! `i < floor(n * percentage / 100)`. Pool assignment depends on this exact
//! rule, integer floor included.

use serde::{Deserialize, Serialize};
use spotwise_core::SpotConfig;
use std::collections::HashMap;

/// Spot share used when the pool leaves it unset
const DEFAULT_SPOT_PERCENTAGE: u32 = 100;

/// Conservative spot share used when the pool leaves it unset
const CONSERVATIVE_DEFAULT_PERCENTAGE: u32 = 50;

/// Percentage points the conservative strategy keeps on on-demand
const CONSERVATIVE_SAFETY_MARGIN: u32 = 10;

/// Price headroom of the aggressive strategy
const AGGRESSIVE_PRICE_FACTOR: f64 = 1.2;

/// Price discount required by the conservative strategy
const CONSERVATIVE_PRICE_FACTOR: f64 = 0.8;

/// Allocation strategy, chosen once per decision manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStrategy {
    /// Honour the configured price ceiling and spot share
    #[default]
    Default,

    /// Everything on spot, tolerate prices up to 20% over the ceiling
    Aggressive,

    /// Require a ceiling and a 20% discount against it, keep a 10-point
    /// on-demand margin, avoid the cheapest (most contended) zone
    Conservative,
}

impl std::fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationStrategy::Default => write!(f, "default"),
            AllocationStrategy::Aggressive => write!(f, "aggressive"),
            AllocationStrategy::Conservative => write!(f, "conservative"),
        }
    }
}

impl AllocationStrategy {
    /// Whether `current_price` fits the pool's budget
    pub fn is_price_acceptable(&self, config: &SpotConfig, current_price: f64) -> bool {
        match self {
            AllocationStrategy::Default => {
                !config.has_price_limit() || current_price <= config.max_spot_price
            }
            AllocationStrategy::Aggressive => {
                !config.has_price_limit()
                    || current_price <= config.max_spot_price * AGGRESSIVE_PRICE_FACTOR
            }
            // No ceiling means no budget to judge against
            AllocationStrategy::Conservative => {
                config.has_price_limit()
                    && current_price <= config.max_spot_price * CONSERVATIVE_PRICE_FACTOR
            }
        }
    }

    /// Spot share actually applied to the pool, 0-100
    pub fn effective_percentage(&self, config: &SpotConfig) -> u32 {
        if !config.enabled {
            return 0;
        }
        match self {
            AllocationStrategy::Default => match config.spot_percentage {
                0 => DEFAULT_SPOT_PERCENTAGE,
                p => p.min(100),
            },
            AllocationStrategy::Aggressive => 100,
            AllocationStrategy::Conservative => {
                let requested = match config.spot_percentage {
                    0 => CONSERVATIVE_DEFAULT_PERCENTAGE,
                    p => p.min(100),
                };
                requested.saturating_sub(CONSERVATIVE_SAFETY_MARGIN)
            }
        }
    }

    /// Number of leading pool indices that are spot nodes
    pub fn spot_node_count(&self, config: &SpotConfig, total_nodes: usize) -> usize {
        let percentage = self.effective_percentage(config) as u128;
        (total_nodes as u128 * percentage / 100) as usize
    }

    /// Whether node `node_index` of `total_nodes` should request spot capacity
    pub fn should_use_spot(&self, config: &SpotConfig, node_index: usize, total_nodes: usize) -> bool {
        if !config.enabled {
            return false;
        }
        match self {
            // Every node is eligible regardless of the configured share
            AllocationStrategy::Aggressive => true,
            AllocationStrategy::Default | AllocationStrategy::Conservative => {
                node_index < self.spot_node_count(config, total_nodes)
            }
        }
    }

    /// Pick the zone for a spot node.
    ///
    /// Zones without a quote are skipped. When no zone is quoted the first
    /// zone is returned; `None` only when `zones` is empty.
    pub fn select_best_zone<'a>(
        &self,
        zones: &'a [String],
        prices: &HashMap<String, f64>,
    ) -> Option<&'a str> {
        match self {
            AllocationStrategy::Default | AllocationStrategy::Aggressive => {
                select_cheapest(zones, prices)
            }
            AllocationStrategy::Conservative => select_median(zones, prices),
        }
    }
}

/// Zones with a usable quote, in input order; NaN, infinite or negative prices count as unquoted
fn quoted<'a>(zones: &'a [String], prices: &HashMap<String, f64>) -> Vec<(&'a str, f64)> {
    zones
        .iter()
        .filter_map(|z| prices.get(z).map(|p| (z.as_str(), *p)))
        .filter(|(_, p)| p.is_finite() && *p >= 0.0)
        .collect()
}

/// Cheapest quoted zone, first in input order on ties
fn select_cheapest<'a>(zones: &'a [String], prices: &HashMap<String, f64>) -> Option<&'a str> {
    let first = zones.first()?.as_str();

    let mut best: Option<(&'a str, f64)> = None;
    for (zone, price) in quoted(zones, prices) {
        match best {
            Some((_, best_price)) if price >= best_price => {}
            _ => best = Some((zone, price)),
        }
    }

    Some(best.map(|(zone, _)| zone).unwrap_or(first))
}

/// Median-priced zone, never the cheapest or priciest when there are 3+
fn select_median<'a>(zones: &'a [String], prices: &HashMap<String, f64>) -> Option<&'a str> {
    if zones.len() <= 2 {
        return select_cheapest(zones, prices);
    }

    let mut candidates = quoted(zones, prices);
    if candidates.len() <= 2 {
        return select_cheapest(zones, prices);
    }

    // Stable: equal prices keep input order
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    Some(candidates[candidates.len() / 2].0)
}

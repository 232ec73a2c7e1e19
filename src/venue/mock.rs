//! In-memory venue network for paper runs and tests.

use super::traits::{PriceOracle, RiskOracle, VenueGateway, YieldOperations};
use super::VenueMetrics;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A transfer the simulated network accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTransfer {
    pub asset: String,
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub slippage: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Mock market and venue state.
#[derive(Debug, Default)]
pub struct MockVenueState {
    pub prices: HashMap<String, Decimal>,
    pub volumes: HashMap<String, Decimal>,
    pub depths: HashMap<String, Decimal>,
    pub risk_scores: HashMap<String, Decimal>,
    /// Keyed by (asset, venue)
    pub metrics: HashMap<(String, String), VenueMetrics>,
    /// Keyed by (asset, venue)
    pub balances: HashMap<(String, String), Decimal>,
    pub transfers: Vec<SimulatedTransfer>,
    /// Slippage applied to every transfer
    pub slippage: Decimal,
    /// Reject every transfer once this many have succeeded
    pub fail_after: Option<usize>,
    /// Venues whose transfers are always rejected
    pub failing_venues: HashSet<String>,
    pub revenue_distributions: Vec<String>,
    pub compounds: u64,
}

/// Simulated oracles, venues and yield operations sharing one state.
#[derive(Clone, Default)]
pub struct MockVenueNetwork {
    state: Arc<RwLock<MockVenueState>>,
    request_count: Arc<AtomicU64>,
}

impl MockVenueNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set price, volume and depth for an asset.
    pub async fn set_market(
        &self,
        asset: &str,
        price: Decimal,
        volume: Decimal,
        depth: Decimal,
    ) {
        let mut state = self.state.write().await;
        state.prices.insert(asset.to_string(), price);
        state.volumes.insert(asset.to_string(), volume);
        state.depths.insert(asset.to_string(), depth);
    }

    /// Update only the price of an asset.
    pub async fn set_price(&self, asset: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(asset.to_string(), price);
    }

    /// Set the external risk score for an asset.
    pub async fn set_risk_score(&self, asset: &str, risk_score: Decimal) {
        self.state
            .write()
            .await
            .risk_scores
            .insert(asset.to_string(), risk_score);
    }

    /// Register a venue for an asset with an initial deployed balance.
    pub async fn add_venue(&self, asset: &str, metrics: VenueMetrics, balance: Decimal) {
        let mut state = self.state.write().await;
        let key = (asset.to_string(), metrics.venue.clone());
        state.balances.insert(key.clone(), balance);
        state.metrics.insert(key, metrics);
    }

    /// Replace a venue's metrics, keeping its balance.
    pub async fn update_metrics(&self, asset: &str, metrics: VenueMetrics) {
        let mut state = self.state.write().await;
        state
            .metrics
            .insert((asset.to_string(), metrics.venue.clone()), metrics);
    }

    /// Set the slippage applied to every transfer.
    pub async fn set_slippage(&self, slippage: Decimal) {
        self.state.write().await.slippage = slippage;
    }

    /// Reject every transfer after `successful` transfers have gone through.
    pub async fn fail_after(&self, successful: usize) {
        self.state.write().await.fail_after = Some(successful);
    }

    /// Reject every transfer touching `venue`.
    pub async fn fail_venue(&self, venue: &str) {
        self.state
            .write()
            .await
            .failing_venues
            .insert(venue.to_string());
    }

    /// Current balance of an asset in a venue.
    pub async fn balance_of(&self, asset: &str, venue: &str) -> Decimal {
        self.state
            .read()
            .await
            .balances
            .get(&(asset.to_string(), venue.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// All transfers accepted so far.
    pub async fn transfers(&self) -> Vec<SimulatedTransfer> {
        self.state.read().await.transfers.clone()
    }

    /// Assets revenue was distributed for, in call order.
    pub async fn revenue_distributions(&self) -> Vec<String> {
        self.state.read().await.revenue_distributions.clone()
    }

    /// Number of compound calls.
    pub async fn compound_count(&self) -> u64 {
        self.state.read().await.compounds
    }

    /// Number of collaborator calls served.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn track_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    async fn market_value(
        &self,
        asset: &str,
        pick: impl Fn(&MockVenueState) -> &HashMap<String, Decimal>,
    ) -> Result<Decimal> {
        self.track_request();
        let state = self.state.read().await;
        pick(&state)
            .get(asset)
            .copied()
            .ok_or_else(|| anyhow!("no market data for {}", asset))
    }
}

#[async_trait]
impl PriceOracle for MockVenueNetwork {
    async fn price(&self, asset: &str) -> Result<Decimal> {
        self.market_value(asset, |s| &s.prices).await
    }

    async fn trading_volume(&self, asset: &str) -> Result<Decimal> {
        self.market_value(asset, |s| &s.volumes).await
    }

    async fn liquidity_depth(&self, asset: &str) -> Result<Decimal> {
        self.market_value(asset, |s| &s.depths).await
    }
}

#[async_trait]
impl RiskOracle for MockVenueNetwork {
    async fn risk_score(&self, asset: &str) -> Result<Decimal> {
        self.track_request();
        let state = self.state.read().await;
        Ok(state
            .risk_scores
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl VenueGateway for MockVenueNetwork {
    async fn venue_metrics(&self, asset: &str, venue: &str) -> Result<VenueMetrics> {
        self.track_request();
        let state = self.state.read().await;
        state
            .metrics
            .get(&(asset.to_string(), venue.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("unknown venue {} for {}", venue, asset))
    }

    async fn balance(&self, asset: &str, venue: &str) -> Result<Decimal> {
        self.track_request();
        let state = self.state.read().await;
        state
            .balances
            .get(&(asset.to_string(), venue.to_string()))
            .copied()
            .ok_or_else(|| anyhow!("unknown venue {} for {}", venue, asset))
    }

    async fn transfer_between_venues(
        &self,
        asset: &str,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal> {
        self.track_request();
        let mut state = self.state.write().await;

        if state.failing_venues.contains(from) || state.failing_venues.contains(to) {
            return Err(anyhow!("venue rejected transfer {} -> {}", from, to));
        }
        if let Some(limit) = state.fail_after {
            if state.transfers.len() >= limit {
                return Err(anyhow!("transfer rejected after {} transfers", limit));
            }
        }

        let from_key = (asset.to_string(), from.to_string());
        let to_key = (asset.to_string(), to.to_string());
        let available = state.balances.get(&from_key).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(anyhow!(
                "insufficient balance in {}: {} < {}",
                from,
                available,
                amount
            ));
        }
        if !state.balances.contains_key(&to_key) {
            return Err(anyhow!("unknown destination venue {}", to));
        }

        let slippage = state.slippage;
        let received = amount * (Decimal::ONE - slippage);
        *state.balances.entry(from_key).or_insert(Decimal::ZERO) -= amount;
        *state.balances.entry(to_key).or_insert(Decimal::ZERO) += received;
        state.transfers.push(SimulatedTransfer {
            asset: asset.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
            slippage,
            timestamp: Utc::now(),
        });

        debug!(%asset, %from, %to, %amount, %slippage, "Simulated transfer");
        Ok(slippage)
    }
}

#[async_trait]
impl YieldOperations for MockVenueNetwork {
    async fn distribute_revenue(&self, asset: &str) -> Result<()> {
        self.track_request();
        self.state
            .write()
            .await
            .revenue_distributions
            .push(asset.to_string());
        info!(%asset, "Simulated revenue distribution");
        Ok(())
    }

    async fn compound_yield(&self) -> Result<()> {
        self.track_request();
        self.state.write().await.compounds += 1;
        info!("Simulated yield compounding");
        Ok(())
    }
}

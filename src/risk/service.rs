use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use super::{validate, AccountRiskState, OrderProposal, RiskCheckResult, RiskPolicy, RiskPolicyUpdate};
use crate::persistence::{OrderStore, PositionStore, RiskPolicyStore};
use crate::Result;

/// Exposure snapshot for an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRiskSummary {
    pub total_position_value: Decimal,
    pub daily_realized_pnl: Decimal,
    pub open_orders: usize,
    pub open_positions: usize,
    pub policy: RiskPolicy,
}

/// Loads account state and policies for the pure validator.
///
/// Fail-open: if anything goes wrong while gathering inputs, the order is
/// allowed and a warning is logged.
pub struct RiskService {
    policies: Arc<dyn RiskPolicyStore>,
    positions: Arc<dyn PositionStore>,
    orders: Arc<dyn OrderStore>,
    defaults: RiskPolicy,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, (RiskPolicy, Instant)>>,
}

impl RiskService {
    pub fn new(
        policies: Arc<dyn RiskPolicyStore>,
        positions: Arc<dyn PositionStore>,
        orders: Arc<dyn OrderStore>,
        defaults: RiskPolicy,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            policies,
            positions,
            orders,
            defaults,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Effective policy for an account; defaults when none is stored
    pub async fn get_policy(&self, account_id: &str) -> Result<RiskPolicy> {
        {
            let cache = self.cache.read().await;
            if let Some((policy, fetched_at)) = cache.get(account_id) {
                if fetched_at.elapsed() < self.cache_ttl {
                    return Ok(policy.clone());
                }
            }
        }

        let policy = self
            .policies
            .find_policy(account_id)
            .await?
            .unwrap_or_else(|| self.defaults.clone());

        self.cache
            .write()
            .await
            .insert(account_id.to_string(), (policy.clone(), Instant::now()));

        Ok(policy)
    }

    pub async fn update_policy(
        &self,
        account_id: &str,
        update: &RiskPolicyUpdate,
    ) -> Result<RiskPolicy> {
        let current = self
            .policies
            .find_policy(account_id)
            .await?
            .unwrap_or_else(|| self.defaults.clone());
        let policy = current.merged(update);

        self.policies.save_policy(account_id, &policy).await?;
        self.cache.write().await.remove(account_id);

        tracing::info!(account_id, ?policy, "Risk policy updated");
        Ok(policy)
    }

    async fn account_state(&self, account_id: &str, symbol: &str) -> Result<AccountRiskState> {
        let today = Utc::now().date_naive();
        let positions = self.positions.positions_for_account(account_id).await?;

        let daily_realized_loss = positions
            .iter()
            .map(|p| p.realized_on(today))
            .filter(|pnl| *pnl < Decimal::ZERO)
            .map(|pnl| -pnl)
            .sum();

        let position_value = positions
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.value())
            .unwrap_or(Decimal::ZERO);

        let open_orders = self.orders.count_open_orders(account_id).await?;

        Ok(AccountRiskState {
            daily_realized_loss,
            position_value,
            open_orders,
        })
    }

    /// Gate a proposed order. Never returns an error: internal failures
    /// pass the order with a logged warning.
    pub async fn validate_order(&self, account_id: &str, proposal: &OrderProposal) -> RiskCheckResult {
        let inputs = async {
            let policy = self.get_policy(account_id).await?;
            let state = self.account_state(account_id, &proposal.symbol).await?;
            Ok::<_, crate::TradingError>((policy, state))
        };

        match inputs.await {
            Ok((policy, state)) => {
                let result = validate(proposal, &policy, &state);
                if !result.passed {
                    tracing::info!(
                        account_id,
                        symbol = %proposal.symbol,
                        check = ?result.failing_check,
                        reason = ?result.reason,
                        "🛑 Order blocked by risk check"
                    );
                }
                result
            }
            Err(e) => {
                tracing::warn!(
                    account_id,
                    symbol = %proposal.symbol,
                    error = %e,
                    "Risk validation failed internally, allowing order (fail-open)"
                );
                RiskCheckResult::pass()
            }
        }
    }

    pub async fn account_summary(&self, account_id: &str) -> Result<AccountRiskSummary> {
        let today = Utc::now().date_naive();
        let positions = self.positions.positions_for_account(account_id).await?;

        let open: Vec<_> = positions.iter().filter(|p| p.amount > Decimal::ZERO).collect();
        let total_position_value = open.iter().map(|p| p.value()).sum();
        let daily_realized_pnl = positions.iter().map(|p| p.realized_on(today)).sum();

        Ok(AccountRiskSummary {
            total_position_value,
            daily_realized_pnl,
            open_orders: self.orders.count_open_orders(account_id).await?,
            open_positions: open.len(),
            policy: self.get_policy(account_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TradingError;
    use crate::execution::OrderSide;
    use crate::persistence::MemoryStore;
    use crate::risk::RiskCheck;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct BrokenPolicies;

    #[async_trait]
    impl RiskPolicyStore for BrokenPolicies {
        async fn find_policy(&self, _account_id: &str) -> Result<Option<RiskPolicy>> {
            Err(TradingError::Storage("connection refused".to_string()))
        }

        async fn save_policy(&self, _account_id: &str, _policy: &RiskPolicy) -> Result<()> {
            Err(TradingError::Storage("connection refused".to_string()))
        }
    }

    fn service(store: &Arc<MemoryStore>) -> RiskService {
        RiskService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            RiskPolicy::default(),
            Duration::from_secs(30),
        )
    }

    fn big_buy() -> OrderProposal {
        OrderProposal {
            symbol: "BTC/KRW".to_string(),
            side: OrderSide::Buy,
            amount: dec!(1),
            price: Some(dec!(50000000)),
        }
    }

    #[tokio::test]
    async fn test_uses_stored_policy() {
        let store = Arc::new(MemoryStore::new());
        let risk = service(&store);

        assert!(!risk.validate_order("acc-1", &big_buy()).await.passed);

        risk.update_policy(
            "acc-1",
            &RiskPolicyUpdate {
                max_order_value: Some(dec!(100000000)),
                max_position_value: Some(dec!(100000000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(risk.validate_order("acc-1", &big_buy()).await.passed);
        // untouched fields keep their defaults
        let policy = risk.get_policy("acc-1").await.unwrap();
        assert_eq!(policy.max_open_orders, 10);
    }

    #[tokio::test]
    async fn test_rejection_names_check() {
        let store = Arc::new(MemoryStore::new());
        let result = service(&store).validate_order("acc-1", &big_buy()).await;
        assert_eq!(result.failing_check, Some(RiskCheck::OrderSize));
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        let store = Arc::new(MemoryStore::new());
        let risk = RiskService::new(
            Arc::new(BrokenPolicies),
            store.clone(),
            store.clone(),
            RiskPolicy::default(),
            Duration::from_secs(30),
        );

        let result = risk.validate_order("acc-1", &big_buy()).await;
        assert!(result.passed);
        assert!(result.failing_check.is_none());
    }

    #[tokio::test]
    async fn test_summary_of_empty_account() {
        let store = Arc::new(MemoryStore::new());
        let summary = service(&store).account_summary("acc-1").await.unwrap();
        assert_eq!(summary.total_position_value, Decimal::ZERO);
        assert_eq!(summary.open_orders, 0);
        assert_eq!(summary.policy, RiskPolicy::default());
    }
}

use std::collections::BTreeMap;

use common::{OrderId, Username};
use domain::{Money, Order};

use crate::error::{Result, SettlementError};
use crate::state::SettlementState;

/// Who pays how much to whom for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub order_id: OrderId,
    pub consumer: Username,
    pub total: Money,
    pub payouts: BTreeMap<Username, Money>,
}

impl SettlementPlan {
    pub fn new(
        order_id: OrderId,
        consumer: Username,
        total: Money,
        payouts: BTreeMap<Username, Money>,
    ) -> Result<Self> {
        if total.is_negative() || payouts.values().any(Money::is_negative) {
            return Err(SettlementError::InvalidPlan(format!(
                "negative amount in settlement of order {order_id}"
            )));
        }
        let sum: Money = payouts.values().copied().sum();
        if sum != total {
            return Err(SettlementError::InvalidPlan(format!(
                "payouts {sum} do not match total {total} for order {order_id}"
            )));
        }
        Ok(Self {
            order_id,
            consumer,
            total,
            payouts,
        })
    }

    /// Builds the plan from an order's captured line prices.
    pub fn for_order(order: &Order) -> Result<Self> {
        Self::new(
            order.id(),
            order.consumer().clone(),
            order.total(),
            order.payouts(),
        )
    }
}

/// One applied balance mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStep {
    Debit { username: Username, amount: Money },
    Credit { username: Username, amount: Money },
}

impl SettlementStep {
    pub fn username(&self) -> &Username {
        match self {
            SettlementStep::Debit { username, .. } | SettlementStep::Credit { username, .. } => {
                username
            }
        }
    }

    pub fn amount(&self) -> Money {
        match self {
            SettlementStep::Debit { amount, .. } | SettlementStep::Credit { amount, .. } => *amount,
        }
    }

    /// Step name used in logs and errors, e.g. `debit:alice`.
    pub fn name(&self) -> String {
        match self {
            SettlementStep::Debit { username, .. } => format!("debit:{username}"),
            SettlementStep::Credit { username, .. } => format!("credit:{username}"),
        }
    }
}

/// Outcome of a completed settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReceipt {
    pub order_id: OrderId,
    /// Consumer's balance right after the debit.
    pub consumer_balance: Money,
    /// Steps in the order they were applied.
    pub steps: Vec<SettlementStep>,
    pub state: SettlementState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::ProductKey;
    use domain::OrderLine;

    #[test]
    fn test_plan_from_order_groups_by_merchant() {
        let order = Order::new(
            OrderId::new(),
            Username::new("u1"),
            vec![
                OrderLine::new(ProductKey::new("A", "m1"), 2, Money::from_whole(5)),
                OrderLine::new(ProductKey::new("B", "m2"), 1, Money::from_whole(7)),
                OrderLine::new(ProductKey::new("C", "m1"), 1, Money::from_whole(1)),
            ],
            Utc::now(),
        )
        .unwrap();

        let plan = SettlementPlan::for_order(&order).unwrap();
        assert_eq!(plan.total, Money::from_whole(18));
        assert_eq!(plan.payouts.len(), 2);
        assert_eq!(plan.payouts[&Username::new("m1")], Money::from_whole(11));
    }

    #[test]
    fn test_plan_rejects_unbalanced_payouts() {
        let mut payouts = BTreeMap::new();
        payouts.insert(Username::new("m1"), Money::from_whole(3));
        let result = SettlementPlan::new(
            OrderId::new(),
            Username::new("u1"),
            Money::from_whole(4),
            payouts,
        );
        assert!(matches!(result, Err(SettlementError::InvalidPlan(_))));
    }

    #[test]
    fn test_step_names() {
        let step = SettlementStep::Credit {
            username: Username::new("m1"),
            amount: Money::from_whole(1),
        };
        assert_eq!(step.name(), "credit:m1");
        assert_eq!(step.amount(), Money::from_whole(1));
    }
}

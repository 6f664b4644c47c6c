//! Order entity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductKey, Username};
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use crate::error::{DomainError, Result};
use crate::value_objects::Money;

/// Seconds a pending order holds its reservations.
pub const ORDER_TTL_SECS: i64 = 300;

/// One product line of an order, priced when the order was prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[serde(flatten)]
    pub key: ProductKey,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(key: ProductKey, quantity: u32, unit_price: Money) -> Self {
        Self {
            key,
            quantity,
            unit_price,
        }
    }

    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A consumer's order.
///
/// The line set is fixed at creation. Only the status moves, and only out of
/// `Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "orderId")]
    id: OrderId,
    #[serde(rename = "consumerUsername")]
    consumer: Username,
    #[serde(rename = "items")]
    lines: Vec<OrderLine>,
    status: OrderStatus,
    created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order. Lines must be non-empty with unique keys and
    /// positive quantities, and the total must fit in [`Money`].
    pub fn new(
        id: OrderId,
        consumer: Username,
        lines: Vec<OrderLine>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation("Order has no items."));
        }
        for (i, line) in lines.iter().enumerate() {
            if line.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "Item quantity must be positive for {}",
                    line.key.name
                )));
            }
            if lines[..i].iter().any(|other| other.key == line.key) {
                return Err(DomainError::validation(format!(
                    "Duplicate order line for {}",
                    line.key
                )));
            }
        }
        let total = lines.iter().try_fold(Money::zero(), |acc, line| {
            line.unit_price
                .checked_mul(line.quantity)
                .and_then(|subtotal| acc.checked_add(subtotal))
        });
        if total.is_none() {
            return Err(DomainError::validation("Order total is too large."));
        }
        Ok(Self {
            id,
            consumer,
            lines,
            status: OrderStatus::Pending,
            created_at,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn consumer(&self) -> &Username {
        &self.consumer
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }

    /// Amount owed to each merchant represented in the order.
    pub fn payouts(&self) -> BTreeMap<Username, Money> {
        let mut payouts = BTreeMap::new();
        for line in &self.lines {
            *payouts
                .entry(line.key.merchant_username.clone())
                .or_insert_with(Money::zero) += line.subtotal();
        }
        payouts
    }

    /// Seconds left in the pending window, never negative. Zero for orders
    /// that are no longer pending.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        if self.status != OrderStatus::Pending {
            return 0;
        }
        let elapsed = (now - self.created_at).num_seconds();
        (ORDER_TTL_SECS - elapsed).clamp(0, ORDER_TTL_SECS)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.remaining_seconds(now) == 0
    }

    pub fn mark_paid(&mut self) -> Result<()> {
        if !self.status.can_pay() {
            return Err(self.invalid_transition("pay"));
        }
        self.status = OrderStatus::Paid;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if !self.status.can_cancel() {
            return Err(self.invalid_transition("cancel"));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }

    /// Follows a product rename. Returns whether any line referred to `from`.
    pub fn rename_product(&mut self, from: &ProductKey, to: &ProductKey) -> bool {
        let mut renamed = false;
        for line in self.lines.iter_mut().filter(|line| &line.key == from) {
            line.key = to.clone();
            renamed = true;
        }
        renamed
    }

    /// Undoes [`Order::mark_paid`] when a payment could not be made durable.
    pub fn revert_payment(&mut self) -> Result<()> {
        if self.status != OrderStatus::Paid {
            return Err(self.invalid_transition("revert payment"));
        }
        self.status = OrderStatus::Pending;
        Ok(())
    }

    fn invalid_transition(&self, action: &str) -> DomainError {
        DomainError::invalid_state(format!(
            "Order {} is {}, cannot {action}",
            self.id, self.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn order_at(created_at: DateTime<Utc>) -> Order {
        Order::new(
            OrderId::new(),
            Username::new("u1"),
            vec![
                OrderLine::new(ProductKey::new("Shirt", "m1"), 2, Money::from_whole(10)),
                OrderLine::new(ProductKey::new("Book", "m2"), 1, Money::from_whole(5)),
                OrderLine::new(ProductKey::new("Hat", "m1"), 1, Money::from_whole(3)),
            ],
            created_at,
        )
        .unwrap()
    }

    #[test]
    fn test_total_and_payouts() {
        let order = order_at(Utc::now());
        assert_eq!(order.total(), Money::from_whole(28));

        let payouts = order.payouts();
        assert_eq!(payouts[&Username::new("m1")], Money::from_whole(23));
        assert_eq!(payouts[&Username::new("m2")], Money::from_whole(5));
    }

    #[test]
    fn test_remaining_seconds() {
        let t0 = Utc::now();
        let order = order_at(t0);
        assert_eq!(order.remaining_seconds(t0), 300);
        assert_eq!(order.remaining_seconds(t0 + Duration::seconds(120)), 180);
        assert_eq!(order.remaining_seconds(t0 + Duration::seconds(300)), 0);
        assert_eq!(order.remaining_seconds(t0 + Duration::seconds(301)), 0);
        assert!(order.is_expired(t0 + Duration::seconds(301)));
        assert!(!order.is_expired(t0 + Duration::seconds(299)));
    }

    #[test]
    fn test_terminal_orders_report_zero_remaining() {
        let t0 = Utc::now();
        let mut order = order_at(t0);
        order.mark_paid().unwrap();
        assert_eq!(order.remaining_seconds(t0), 0);
        assert!(!order.is_expired(t0 + Duration::seconds(999)));
    }

    #[test]
    fn test_transitions_only_from_pending() {
        let mut order = order_at(Utc::now());
        order.cancel().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.mark_paid().unwrap_err().kind(), "InvalidState");
        assert!(order.cancel().is_err());
    }

    #[test]
    fn test_revert_payment() {
        let mut order = order_at(Utc::now());
        assert!(order.revert_payment().is_err());
        order.mark_paid().unwrap();
        order.revert_payment().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_new_rejects_bad_lines() {
        let key = ProductKey::new("Shirt", "m1");
        let empty = Order::new(OrderId::new(), "u1".into(), vec![], Utc::now());
        assert!(empty.is_err());

        let zero = Order::new(
            OrderId::new(),
            "u1".into(),
            vec![OrderLine::new(key.clone(), 0, Money::from_whole(1))],
            Utc::now(),
        );
        assert!(zero.is_err());

        let dup = Order::new(
            OrderId::new(),
            "u1".into(),
            vec![
                OrderLine::new(key.clone(), 1, Money::from_whole(1)),
                OrderLine::new(key, 2, Money::from_whole(1)),
            ],
            Utc::now(),
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_new_rejects_total_overflow() {
        let err = Order::new(
            OrderId::new(),
            "u1".into(),
            vec![OrderLine::new(
                ProductKey::new("Yacht", "m1"),
                2,
                Money::from_cents(5_000_000_000_000_000_000),
            )],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_rename_product_moves_matching_lines() {
        let mut order = order_at(Utc::now());
        let linen = ProductKey::new("Linen", "m1");
        assert!(order.rename_product(&ProductKey::new("Shirt", "m1"), &linen));
        assert_eq!(order.lines()[0].key, linen);
        assert_eq!(order.total(), Money::from_whole(28));
        assert!(!order.rename_product(&ProductKey::new("Shirt", "m1"), &linen));
    }

    #[test]
    fn test_persisted_shape() {
        let order = order_at(Utc::now());
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["orderId"], order.id().to_string());
        assert_eq!(json["consumerUsername"], "u1");
        assert_eq!(json["status"], "Pending");
        assert_eq!(json["items"][0]["productName"], "Shirt");
        assert_eq!(json["items"][0]["unitPrice"], 1000);
    }
}

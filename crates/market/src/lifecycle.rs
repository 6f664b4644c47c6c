//! Order lifecycle: prepare, pay, expire.
//!
//! The manager holds no state of its own. Each operation borrows the ledgers
//! it touches, so callers decide how they are locked.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductKey, Username};
use domain::{
    BalanceLedger, DomainError, InventoryLedger, Money, Order, OrderBook, OrderLine, OrderStatus,
    Result,
};
use settlement::{SettlementCoordinator, SettlementPlan, SettlementReceipt};

/// Point-in-time view of an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub order: Order,
    pub total: Money,
    pub remaining_seconds: i64,
}

impl OrderSummary {
    pub fn of(order: &Order, now: DateTime<Utc>) -> Self {
        Self {
            order: order.clone(),
            total: order.total(),
            remaining_seconds: order.remaining_seconds(now),
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.order.status()
    }
}

/// Result of a successful payment.
#[derive(Debug, Clone)]
pub struct Payment {
    pub receipt: SettlementReceipt,
    pub order: Order,
}

impl Payment {
    pub fn new_balance(&self) -> Money {
        self.receipt.consumer_balance
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderLifecycleManager {
    settlement: SettlementCoordinator,
}

impl OrderLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes stock for every requested item and records a pending order.
    ///
    /// Duplicate products are merged. If any freeze fails, every freeze
    /// already granted for this order is released before the error returns.
    #[tracing::instrument(skip(self, inventory, orders, items), fields(items = items.len()))]
    pub fn prepare_order(
        &self,
        inventory: &mut InventoryLedger,
        orders: &mut OrderBook,
        consumer: &Username,
        items: &[(ProductKey, u32)],
        now: DateTime<Utc>,
    ) -> Result<OrderSummary> {
        if items.is_empty() {
            return Err(DomainError::validation("Order must contain at least one item."));
        }

        let mut merged: Vec<(ProductKey, u32)> = Vec::with_capacity(items.len());
        for (key, qty) in items {
            if *qty == 0 {
                return Err(DomainError::validation(format!(
                    "Item quantity must be positive for {}",
                    key.name
                )));
            }
            match merged.iter_mut().find(|(k, _)| k == key) {
                Some((_, total)) => {
                    *total = total.checked_add(*qty).ok_or_else(|| {
                        DomainError::validation(format!("Quantity too large for {}", key.name))
                    })?
                }
                None => merged.push((key.clone(), *qty)),
            }
        }
        for (key, _) in &merged {
            if !inventory.contains(key) {
                return Err(DomainError::not_found(format!("Product not found: {key}")));
            }
        }

        let mut lines = Vec::with_capacity(merged.len());
        for (key, qty) in merged {
            if let Err(e) = inventory.freeze(&key, qty) {
                Self::release_lines(inventory, &lines);
                tracing::info!(error = %e, "order preparation rejected");
                return Err(e);
            }
            let unit_price = match inventory.price_of(&key) {
                Ok(price) => price,
                Err(e) => {
                    if let Err(release) = inventory.release(&key, qty) {
                        tracing::error!(product = %key, error = %release, "failed to release reservation");
                    }
                    Self::release_lines(inventory, &lines);
                    return Err(e);
                }
            };
            lines.push(OrderLine::new(key, qty, unit_price));
        }

        let order = match Order::new(OrderId::new(), consumer.clone(), lines.clone(), now) {
            Ok(order) => order,
            Err(e) => {
                Self::release_lines(inventory, &lines);
                return Err(e);
            }
        };
        let summary = OrderSummary::of(&order, now);
        tracing::info!(order_id = %order.id(), total = %summary.total, "order prepared");
        metrics::counter!("orders_prepared_total").increment(1);
        orders.insert(order);
        Ok(summary)
    }

    /// Settles a pending order and confirms its stock.
    ///
    /// An expired order is cancelled, its stock released, and `OrderExpired`
    /// returned. A failed settlement leaves the order pending with its stock
    /// still frozen.
    #[tracing::instrument(skip(self, inventory, orders, ledger))]
    pub fn pay_order<L: BalanceLedger>(
        &self,
        inventory: &mut InventoryLedger,
        orders: &mut OrderBook,
        ledger: &mut L,
        order_id: OrderId,
        consumer: &Username,
        now: DateTime<Utc>,
    ) -> Result<Payment> {
        let order = Self::owned_order(orders, order_id, consumer)?;
        if !order.status().can_pay() {
            return Err(DomainError::invalid_state(format!(
                "Order {order_id} is {}, only pending orders can be paid",
                order.status()
            )));
        }
        if order.remaining_seconds(now) == 0 {
            self.expire(inventory, orders, order_id)?;
            return Err(DomainError::OrderExpired(order_id));
        }

        let plan = SettlementPlan::for_order(order)?;
        let receipt = self.settlement.settle(ledger, &plan)?;

        let lines = order.lines().to_vec();
        let mut confirmed: Vec<&OrderLine> = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Err(e) = inventory.confirm(&line.key, line.quantity) {
                for done in confirmed.iter().rev() {
                    if let Err(undo) = inventory.unconfirm(&done.key, done.quantity) {
                        tracing::error!(product = %done.key, error = %undo, "failed to undo stock confirmation");
                    }
                }
                if let Err(rev) = self.settlement.reverse(ledger, &receipt) {
                    tracing::error!(error = %rev, "settlement reversal failed after stock inconsistency");
                }
                return Err(e);
            }
            confirmed.push(line);
        }

        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| DomainError::not_found(format!("Order not found: {order_id}")))?;
        order.mark_paid()?;
        metrics::counter!("orders_paid_total").increment(1);
        tracing::info!(%order_id, new_balance = %receipt.consumer_balance, "order paid");
        Ok(Payment {
            receipt,
            order: order.clone(),
        })
    }

    /// Undoes a successful [`OrderLifecycleManager::pay_order`]: stock
    /// confirmations, the paid status and the settlement.
    #[tracing::instrument(skip(self, inventory, orders, ledger, payment), fields(order_id = %payment.order.id()))]
    pub fn rollback_payment<L: BalanceLedger>(
        &self,
        inventory: &mut InventoryLedger,
        orders: &mut OrderBook,
        ledger: &mut L,
        payment: &Payment,
    ) -> Result<()> {
        for line in payment.order.lines().iter().rev() {
            inventory.unconfirm(&line.key, line.quantity)?;
        }
        if let Some(order) = orders.get_mut(&payment.order.id()) {
            order.revert_payment()?;
        }
        self.settlement.reverse(ledger, &payment.receipt)?;
        tracing::warn!("payment rolled back");
        Ok(())
    }

    /// Cancels every pending order whose window has closed and releases its
    /// stock. Returns the cancelled ids.
    pub fn check_timeout_orders(
        &self,
        inventory: &mut InventoryLedger,
        orders: &mut OrderBook,
        now: DateTime<Utc>,
    ) -> Vec<OrderId> {
        let expired = orders.expired_ids(now);
        let mut cancelled = Vec::with_capacity(expired.len());
        for id in expired {
            match self.expire(inventory, orders, id) {
                Ok(()) => cancelled.push(id),
                Err(e) => tracing::error!(order_id = %id, error = %e, "failed to expire order"),
            }
        }
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "expired pending orders");
        }
        cancelled
    }

    /// A consumer's orders, newest first.
    pub fn orders_for(
        &self,
        orders: &OrderBook,
        consumer: &Username,
        now: DateTime<Utc>,
    ) -> Vec<OrderSummary> {
        orders
            .for_consumer(consumer)
            .into_iter()
            .map(|o| OrderSummary::of(o, now))
            .collect()
    }

    /// Removes an order that never became durable, releasing its stock if
    /// it was still pending.
    pub fn discard_order(
        &self,
        inventory: &mut InventoryLedger,
        orders: &mut OrderBook,
        order_id: OrderId,
    ) -> Option<Order> {
        let order = orders.remove(&order_id)?;
        if order.status() == OrderStatus::Pending {
            Self::release_lines(inventory, order.lines());
        }
        Some(order)
    }

    /// Cancels a pending order and releases its reservations.
    fn expire(
        &self,
        inventory: &mut InventoryLedger,
        orders: &mut OrderBook,
        order_id: OrderId,
    ) -> Result<()> {
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| DomainError::not_found(format!("Order not found: {order_id}")))?;
        // The status check guarantees release happens once per order.
        order.cancel()?;
        Self::release_lines(inventory, order.lines());
        metrics::counter!("orders_expired_total").increment(1);
        tracing::info!(%order_id, "order expired, stock released");
        Ok(())
    }

    fn owned_order<'a>(
        orders: &'a OrderBook,
        order_id: OrderId,
        consumer: &Username,
    ) -> Result<&'a Order> {
        let order = orders
            .get(&order_id)
            .ok_or_else(|| DomainError::not_found(format!("Order not found: {order_id}")))?;
        if order.consumer() != consumer {
            return Err(DomainError::WrongOwner {
                order_id,
                username: consumer.clone(),
            });
        }
        Ok(order)
    }

    fn release_lines(inventory: &mut InventoryLedger, lines: &[OrderLine]) {
        for line in lines {
            if let Err(e) = inventory.release(&line.key, line.quantity) {
                tracing::error!(product = %line.key, error = %e, "failed to release reservation");
            }
        }
    }
}

//! The combined ledger state guarded by the market lock.

use domain::{
    Account, AccountLedger, CartBook, CartMap, Catalog, InventoryLedger, Order, OrderBook,
    OrderStatus,
};

/// Every ledger the market coordinates.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    pub inventory: InventoryLedger,
    pub accounts: AccountLedger,
    pub carts: CartBook,
    pub orders: OrderBook,
}

/// What [`MarketState::reconcile`] had to fix after a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dropped_orders: usize,
    pub cancelled_orders: usize,
    pub restored_reservations: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.dropped_orders > 0 || self.cancelled_orders > 0
    }
}

impl MarketState {
    pub fn from_parts(
        catalog: Catalog,
        accounts: Vec<Account>,
        orders: Vec<Order>,
        carts: CartMap,
    ) -> Self {
        Self {
            inventory: InventoryLedger::from_catalog(catalog),
            accounts: AccountLedger::from_accounts(accounts),
            carts: CartBook::from_map(carts),
            orders: OrderBook::from_orders(orders),
        }
    }

    /// Makes freshly loaded state consistent.
    ///
    /// Orders naming products that no longer exist are dropped. Frozen stock
    /// is rebuilt from the pending orders so it matches live reservations;
    /// a pending order whose reservation no longer fits is cancelled.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let orphaned: Vec<_> = self
            .orders
            .to_vec()
            .into_iter()
            .filter(|o| o.lines().iter().any(|l| !self.inventory.contains(&l.key)))
            .map(|o| o.id())
            .collect();
        for id in orphaned {
            tracing::warn!(order_id = %id, "order references unknown product, dropped");
            self.orders.remove(&id);
            report.dropped_orders += 1;
        }

        self.inventory.clear_reservations();
        // Oldest reservations win when stock no longer covers all of them.
        let pending: Vec<Order> = self
            .orders
            .to_vec()
            .into_iter()
            .filter(|o| o.status() == OrderStatus::Pending)
            .collect();
        for order in pending {
            let mut granted = Vec::new();
            let mut failed = false;
            for line in order.lines() {
                match self.inventory.freeze(&line.key, line.quantity) {
                    Ok(()) => granted.push(line),
                    Err(e) => {
                        tracing::warn!(order_id = %order.id(), error = %e, "reservation no longer fits, cancelling order");
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                for line in granted {
                    if let Err(e) = self.inventory.release(&line.key, line.quantity) {
                        tracing::error!(product = %line.key, error = %e, "failed to release reservation");
                    }
                }
                if let Some(o) = self.orders.get_mut(&order.id())
                    && let Err(e) = o.cancel()
                {
                    tracing::error!(order_id = %order.id(), error = %e, "failed to cancel order");
                }
                report.cancelled_orders += 1;
            } else {
                report.restored_reservations += 1;
            }
        }

        let inventory = &self.inventory;
        self.carts.retain_products(|key| inventory.contains(key));
        report
    }
}

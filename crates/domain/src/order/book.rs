use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductKey, Username};

use super::{Order, OrderStatus};

/// Every order known to the market, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: HashMap<OrderId, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        Self {
            orders: orders.into_iter().map(|o| (o.id(), o)).collect(),
        }
    }

    pub fn insert(&mut self, order: Order) {
        self.orders.insert(order.id(), order);
    }

    pub fn remove(&mut self, id: &OrderId) -> Option<Order> {
        self.orders.remove(id)
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn get_mut(&mut self, id: &OrderId) -> Option<&mut Order> {
        self.orders.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Order> {
        self.orders
            .values()
            .filter(|o| o.status() == OrderStatus::Pending)
    }

    /// Re-keys every order line naming `from`. Returns how many orders
    /// changed.
    pub fn rename_product(&mut self, from: &ProductKey, to: &ProductKey) -> usize {
        self.orders
            .values_mut()
            .map(|order| order.rename_product(from, to))
            .filter(|&renamed| renamed)
            .count()
    }

    /// Ids of pending orders whose window has closed at `now`.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.is_expired(now))
            .map(Order::id)
            .collect()
    }

    /// A consumer's orders, newest first.
    pub fn for_consumer(&self, consumer: &Username) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.consumer() == consumer)
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        orders
    }

    /// All orders in creation order, for persistence.
    pub fn to_vec(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        orders
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::order::OrderLine;
    use crate::value_objects::Money;

    fn order(consumer: &str, created_at: DateTime<Utc>) -> Order {
        Order::new(
            OrderId::new(),
            Username::new(consumer),
            vec![OrderLine::new(
                ProductKey::new("Shirt", "m1"),
                1,
                Money::from_whole(1),
            )],
            created_at,
        )
        .unwrap()
    }

    #[test]
    fn test_for_consumer_newest_first() {
        let t0 = Utc::now();
        let old = order("u1", t0);
        let new = order("u1", t0 + Duration::seconds(10));
        let other = order("u2", t0 + Duration::seconds(5));
        let (old_id, new_id) = (old.id(), new.id());
        let book = OrderBook::from_orders([old, new, other]);

        let ids: Vec<OrderId> = book
            .for_consumer(&Username::new("u1"))
            .into_iter()
            .map(Order::id)
            .collect();
        assert_eq!(ids, vec![new_id, old_id]);
    }

    #[test]
    fn test_expired_ids_skip_terminal() {
        let t0 = Utc::now();
        let mut paid = order("u1", t0);
        paid.mark_paid().unwrap();
        let pending = order("u1", t0);
        let pending_id = pending.id();
        let book = OrderBook::from_orders([paid, pending]);

        assert!(book.expired_ids(t0 + Duration::seconds(10)).is_empty());
        assert_eq!(book.expired_ids(t0 + Duration::seconds(301)), vec![pending_id]);
        assert_eq!(book.pending().count(), 1);
    }
}

//! State-change notifications.

use common::{OrderId, ProductKey, Username};
use domain::{Money, OrderStatus};

/// Published by the market after a mutation has been persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    StockChanged {
        product: ProductKey,
        stock: u32,
        frozen_stock: u32,
    },
    BalanceChanged {
        username: Username,
        balance: Money,
    },
    OrderStatusChanged {
        order_id: OrderId,
        consumer: Username,
        status: OrderStatus,
    },
    CatalogChanged,
}

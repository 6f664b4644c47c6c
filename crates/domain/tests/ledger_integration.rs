//! Integration tests for the ledgers working together.
//!
//! These walk an order through reservation, payment and expiry by hand,
//! checking the stock and balance invariants at each step.

use chrono::{Duration, Utc};
use common::{OrderId, ProductKey, Username};
use domain::{
    AccountLedger, BalanceLedger, CartBook, Catalog, Category, InventoryLedger, Money, NewProduct,
    Order, OrderBook, OrderLine, OrderStatus, Role,
};

fn seeded() -> (InventoryLedger, AccountLedger) {
    let mut inventory = InventoryLedger::new();
    for (name, merchant, price, stock, category) in [
        ("Shirt", "m1", 20, 5, Category::Clothing),
        ("Rust Book", "m2", 40, 2, Category::Book),
    ] {
        inventory
            .add_product(
                &Username::new(merchant),
                NewProduct {
                    name: name.into(),
                    description: String::new(),
                    base_price: Money::from_whole(price),
                    stock,
                    category,
                    image_path: String::new(),
                },
            )
            .unwrap();
    }

    let mut accounts = AccountLedger::new();
    accounts.register("u1", "password", Role::Consumer).unwrap();
    accounts.register("m1", "password", Role::Merchant).unwrap();
    accounts.register("m2", "password", Role::Merchant).unwrap();
    accounts
        .recharge(&Username::new("u1"), Money::from_whole(100))
        .unwrap();
    (inventory, accounts)
}

fn shirt() -> ProductKey {
    ProductKey::new("Shirt", "m1")
}

fn book() -> ProductKey {
    ProductKey::new("Rust Book", "m2")
}

mod purchase {
    use super::*;

    #[test]
    fn reserve_settle_confirm() {
        let (mut inventory, mut accounts) = seeded();
        let u1 = Username::new("u1");

        let lines = vec![
            OrderLine::new(shirt(), 1, inventory.price_of(&shirt()).unwrap()),
            OrderLine::new(book(), 1, inventory.price_of(&book()).unwrap()),
        ];
        for line in &lines {
            inventory.freeze(&line.key, line.quantity).unwrap();
        }
        let mut order = Order::new(OrderId::new(), u1.clone(), lines, Utc::now()).unwrap();

        accounts.debit(&u1, order.total()).unwrap();
        for (merchant, amount) in order.payouts() {
            accounts.credit(&merchant, amount).unwrap();
        }
        for line in order.lines() {
            inventory.confirm(&line.key, line.quantity).unwrap();
        }
        order.mark_paid().unwrap();

        assert_eq!(accounts.balance(&u1).unwrap(), Money::from_whole(40));
        assert_eq!(
            accounts.balance(&Username::new("m1")).unwrap(),
            Money::from_whole(20)
        );
        assert_eq!(
            accounts.balance(&Username::new("m2")).unwrap(),
            Money::from_whole(40)
        );
        assert_eq!(inventory.get(&shirt()).unwrap().stock(), 4);
        assert_eq!(inventory.get(&book()).unwrap().frozen_stock(), 0);
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn price_is_captured_when_order_is_created() {
        let (mut inventory, _) = seeded();
        let line = OrderLine::new(shirt(), 2, inventory.price_of(&shirt()).unwrap());
        let order = Order::new(OrderId::new(), "u1".into(), vec![line], Utc::now()).unwrap();

        inventory
            .set_category_discount(Category::Clothing, 0.5)
            .unwrap();

        assert_eq!(order.total(), Money::from_whole(40));
        assert_eq!(inventory.price_of(&shirt()).unwrap(), Money::from_whole(10));
    }
}

mod expiry {
    use super::*;

    #[test]
    fn expired_orders_release_once() {
        let (mut inventory, _) = seeded();
        let t0 = Utc::now();
        inventory.freeze(&shirt(), 3).unwrap();
        let order = Order::new(
            OrderId::new(),
            "u1".into(),
            vec![OrderLine::new(shirt(), 3, Money::from_whole(20))],
            t0,
        )
        .unwrap();
        let mut book = OrderBook::from_orders([order]);

        let later = t0 + Duration::seconds(301);
        for _ in 0..3 {
            for id in book.expired_ids(later) {
                let order = book.get_mut(&id).unwrap();
                order.cancel().unwrap();
                for line in order.lines() {
                    inventory.release(&line.key, line.quantity).unwrap();
                }
            }
        }

        assert_eq!(inventory.available_stock(&shirt()).unwrap(), 5);
        assert!(book.expired_ids(later).is_empty());
    }
}

mod reload {
    use super::*;

    #[test]
    fn catalog_and_carts_survive_serialization() {
        let (inventory, _) = seeded();
        let json = serde_json::to_string(&inventory.to_catalog()).unwrap();
        let restored = InventoryLedger::from_catalog(serde_json::from_str::<Catalog>(&json).unwrap());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.price_of(&book()).unwrap(), Money::from_whole(40));

        let mut carts = CartBook::new();
        carts.add(&Username::new("u1"), shirt(), 2, 5).unwrap();
        carts.retain_products(|key| restored.contains(key));
        assert_eq!(carts.items(&Username::new("u1")).unwrap()[&shirt()], 2);
    }
}

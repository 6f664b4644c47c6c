//! Integration tests for the JSON file store.

use chrono::Utc;
use common::{OrderId, ProductKey, Username};
use domain::{
    Account, CartMap, Category, InventoryLedger, Money, NewProduct, Order, OrderLine, OrderStatus,
    Role,
};
use store::{JsonFileStore, Store, StoreError};
use tempfile::TempDir;

fn store() -> (TempDir, JsonFileStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("data"));
    (dir, store)
}

#[tokio::test]
async fn missing_files_load_empty() {
    let (_dir, store) = store();
    assert!(store.load_all_products().await.unwrap().products.is_empty());
    assert!(store.load_all_users().await.unwrap().is_empty());
    assert!(store.load_orders().await.unwrap().is_empty());
    assert!(store.load_all_carts().await.unwrap().is_empty());
}

#[tokio::test]
async fn catalog_survives_restart() {
    let (dir, store) = store();
    let mut ledger = InventoryLedger::new();
    ledger
        .add_product(
            &Username::new("m1"),
            NewProduct {
                name: "Shirt".into(),
                description: "Cotton".into(),
                base_price: Money::from_whole(20),
                stock: 5,
                category: Category::Clothing,
                image_path: "shirt.png".into(),
            },
        )
        .unwrap();
    ledger
        .set_category_discount(Category::Clothing, 0.8)
        .unwrap();
    store.save_all_products(&ledger.to_catalog()).await.unwrap();

    let reopened = JsonFileStore::new(dir.path().join("data"));
    let restored = InventoryLedger::from_catalog(reopened.load_all_products().await.unwrap());
    let key = ProductKey::new("Shirt", "m1");
    assert_eq!(restored.price_of(&key).unwrap(), Money::from_whole(16));
    assert_eq!(restored.get(&key).unwrap().image_path, "shirt.png");
    assert!(!dir.path().join("data/products.json.tmp").exists());
}

#[tokio::test]
async fn save_user_upserts() {
    let (_dir, store) = store();
    store
        .save_user(&Account::new("alice", "h1", Role::Consumer))
        .await
        .unwrap();
    store
        .save_user(&Account::new("m1", "h2", Role::Merchant))
        .await
        .unwrap();
    store
        .save_user(&Account::new("alice", "h1", Role::Consumer).with_balance(Money::from_whole(9)))
        .await
        .unwrap();

    let users = store.load_all_users().await.unwrap();
    assert_eq!(users.len(), 2);
    let alice = users
        .iter()
        .find(|a| a.username == Username::new("alice"))
        .unwrap();
    assert_eq!(alice.balance(), Money::from_whole(9));
}

#[tokio::test]
async fn orders_keep_status_and_prices() {
    let (_dir, store) = store();
    let mut order = Order::new(
        OrderId::new(),
        Username::new("u1"),
        vec![OrderLine::new(
            ProductKey::new("Shirt", "m1"),
            2,
            Money::from_cents(1999),
        )],
        Utc::now(),
    )
    .unwrap();
    order.mark_paid().unwrap();
    store.save_orders(std::slice::from_ref(&order)).await.unwrap();

    let loaded = store.load_orders().await.unwrap();
    assert_eq!(loaded, vec![order]);
    assert_eq!(loaded[0].status(), OrderStatus::Paid);
    assert_eq!(loaded[0].total(), Money::from_cents(3998));
}

#[tokio::test]
async fn carts_are_written_as_entry_lists() {
    let (dir, store) = store();
    let mut carts = CartMap::new();
    carts
        .entry(Username::new("u1"))
        .or_default()
        .insert(ProductKey::new("Shirt", "m1"), 3);
    store.save_carts(&carts).await.unwrap();

    let raw: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("data/carts.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(raw["u1"][0]["productName"], "Shirt");
    assert_eq!(raw["u1"][0]["merchantUsername"], "m1");
    assert_eq!(raw["u1"][0]["quantity"], 3);

    assert_eq!(store.load_all_carts().await.unwrap(), carts);
}

#[tokio::test]
async fn corrupt_file_is_a_serialization_error() {
    let (dir, store) = store();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(dir.path().join("data/orders.json"), b"{not json").unwrap();

    let err = store.load_orders().await.unwrap_err();
    assert!(matches!(err, StoreError::Serialization { .. }));
    let domain_err: domain::DomainError = err.into();
    assert_eq!(domain_err.kind(), "PersistenceFailure");
}

//! Product catalog and stock bookkeeping.
//!
//! The [`InventoryLedger`] is the only owner of stock counters. Orders hold
//! [`ProductKey`]s and go through the ledger to freeze, release or confirm
//! units.

use std::collections::BTreeMap;

use common::{ProductKey, Username};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::value_objects::Money;

/// Product category. Discounts apply to a whole category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(alias = "图书")]
    Book,
    #[serde(alias = "服装")]
    Clothing,
    #[serde(alias = "食品")]
    Food,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Book, Category::Clothing, Category::Food];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Book => "Book",
            Category::Clothing => "Clothing",
            Category::Food => "Food",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Book" | "book" | "图书" => Ok(Category::Book),
            "Clothing" | "clothing" | "服装" => Ok(Category::Clothing),
            "Food" | "food" | "食品" => Ok(Category::Food),
            other => Err(DomainError::validation(format!(
                "Unknown product category: {other}"
            ))),
        }
    }
}

/// Category → price multiplier. Missing categories price at 1.0.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountTable(BTreeMap<Category, f64>);

impl DiscountTable {
    pub fn get(&self, category: Category) -> f64 {
        self.0.get(&category).copied().unwrap_or(1.0)
    }

    fn set(&mut self, category: Category, factor: f64) {
        self.0.insert(category, factor);
    }
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(flatten)]
    key: ProductKey,
    pub description: String,
    #[serde(rename = "price")]
    pub base_price: Money,
    pub category: Category,
    stock: u32,
    #[serde(default)]
    frozen_stock: u32,
    #[serde(default)]
    pub image_path: String,
}

impl Product {
    pub fn new(
        key: ProductKey,
        description: impl Into<String>,
        base_price: Money,
        category: Category,
        stock: u32,
    ) -> Self {
        Self {
            key,
            description: description.into(),
            base_price,
            category,
            stock,
            frozen_stock: 0,
            image_path: String::new(),
        }
    }

    pub fn with_image_path(mut self, path: impl Into<String>) -> Self {
        self.image_path = path.into();
        self
    }

    pub fn key(&self) -> &ProductKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn merchant(&self) -> &Username {
        &self.key.merchant_username
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    pub fn frozen_stock(&self) -> u32 {
        self.frozen_stock
    }

    /// Units not reserved by any pending order.
    pub fn available_stock(&self) -> u32 {
        self.stock - self.frozen_stock
    }
}

/// Persisted form of the catalog: the discount table plus every product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default, rename = "categories")]
    pub discounts: DiscountTable,
    #[serde(default)]
    pub products: Vec<Product>,
}

/// Fields accepted when a merchant lists a new product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub base_price: Money,
    pub stock: u32,
    pub category: Category,
    pub image_path: String,
}

/// Partial update of a product. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_price: Option<Money>,
    pub stock: Option<u32>,
    pub image_path: Option<String>,
}

/// Which product text a search keyword is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchField {
    #[default]
    Name,
    Description,
}

impl SearchField {
    /// Maps the numeric wire code; unknown codes search by name.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SearchField::Description,
            _ => SearchField::Name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub keyword: String,
    pub field: SearchField,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
}

/// Per-product stock and frozen-stock bookkeeping plus the discount table.
#[derive(Debug, Clone, Default)]
pub struct InventoryLedger {
    products: BTreeMap<ProductKey, Product>,
    discounts: DiscountTable,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from its persisted form.
    ///
    /// Duplicate keys keep the first occurrence; frozen stock above stock is
    /// clamped so the ledger invariant holds from the start.
    pub fn from_catalog(catalog: Catalog) -> Self {
        let mut products = BTreeMap::new();
        for mut product in catalog.products {
            if products.contains_key(&product.key) {
                tracing::warn!(product = %product.key, "duplicate product in catalog, skipped");
                continue;
            }
            product.frozen_stock = product.frozen_stock.min(product.stock);
            products.insert(product.key.clone(), product);
        }
        Self {
            products,
            discounts: catalog.discounts,
        }
    }

    pub fn to_catalog(&self) -> Catalog {
        Catalog {
            discounts: self.discounts.clone(),
            products: self.products.values().cloned().collect(),
        }
    }

    pub fn get(&self, key: &ProductKey) -> Option<&Product> {
        self.products.get(key)
    }

    pub fn contains(&self, key: &ProductKey) -> bool {
        self.products.contains_key(key)
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn product_mut(&mut self, key: &ProductKey) -> Result<&mut Product> {
        self.products
            .get_mut(key)
            .ok_or_else(|| DomainError::not_found(format!("Product not found: {key}")))
    }

    pub fn discount(&self, category: Category) -> f64 {
        self.discounts.get(category)
    }

    /// Current unit price of a product after its category discount.
    pub fn price(&self, product: &Product) -> Money {
        product.base_price.discounted(self.discount(product.category))
    }

    pub fn price_of(&self, key: &ProductKey) -> Result<Money> {
        self.get(key)
            .map(|p| self.price(p))
            .ok_or_else(|| DomainError::not_found(format!("Product not found: {key}")))
    }

    pub fn available_stock(&self, key: &ProductKey) -> Result<u32> {
        self.get(key)
            .map(Product::available_stock)
            .ok_or_else(|| DomainError::not_found(format!("Product not found: {key}")))
    }

    /// Reserves `qty` units. Fails without side effects when fewer than `qty`
    /// units are available.
    pub fn freeze(&mut self, key: &ProductKey, qty: u32) -> Result<()> {
        if qty == 0 {
            return Err(DomainError::validation(format!(
                "Item quantity must be positive for {}",
                key.name
            )));
        }
        let product = self.product_mut(key)?;
        let available = product.available_stock();
        if available < qty {
            tracing::debug!(product = %key, requested = qty, available, "freeze rejected");
            return Err(DomainError::InsufficientStock {
                product: key.clone(),
                requested: qty,
                available,
            });
        }
        product.frozen_stock += qty;
        tracing::debug!(product = %key, qty, frozen = product.frozen_stock, "stock frozen");
        Ok(())
    }

    /// Returns reserved units to available stock, clamping at zero.
    pub fn release(&mut self, key: &ProductKey, qty: u32) -> Result<()> {
        let product = self.product_mut(key)?;
        if qty > product.frozen_stock {
            tracing::warn!(
                product = %key,
                qty,
                frozen = product.frozen_stock,
                "release exceeds frozen stock, clamping"
            );
        }
        product.frozen_stock = product.frozen_stock.saturating_sub(qty);
        tracing::debug!(product = %key, qty, frozen = product.frozen_stock, "stock released");
        Ok(())
    }

    /// Turns a reservation into a permanent deduction.
    pub fn confirm(&mut self, key: &ProductKey, qty: u32) -> Result<()> {
        let product = self.product_mut(key)?;
        if product.frozen_stock < qty || product.stock < qty {
            let detail = format!(
                "confirm {qty} with stock {} and frozen {}",
                product.stock, product.frozen_stock
            );
            tracing::error!(product = %key, %detail, "stock invariant violated");
            return Err(DomainError::StockInconsistency {
                product: key.clone(),
                detail,
            });
        }
        product.stock -= qty;
        product.frozen_stock -= qty;
        Ok(())
    }

    /// Exact inverse of [`InventoryLedger::confirm`].
    pub fn unconfirm(&mut self, key: &ProductKey, qty: u32) -> Result<()> {
        let product = self.product_mut(key)?;
        product.stock += qty;
        product.frozen_stock += qty;
        Ok(())
    }

    /// Zeroes every reservation. Used before replaying pending orders on load.
    pub fn clear_reservations(&mut self) {
        for product in self.products.values_mut() {
            product.frozen_stock = 0;
        }
    }

    /// Sets the multiplier for a category. Returns whether it changed.
    pub fn set_category_discount(&mut self, category: Category, factor: f64) -> Result<bool> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(DomainError::validation(format!(
                "Invalid discount value {factor}. Must be between 0.0 and 1.0."
            )));
        }
        if (self.discounts.get(category) - factor).abs() < 0.001 {
            return Ok(false);
        }
        self.discounts.set(category, factor);
        tracing::info!(%category, factor, "category discount updated");
        Ok(true)
    }

    pub fn add_product(&mut self, merchant: &Username, new: NewProduct) -> Result<ProductKey> {
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("Product name cannot be empty."));
        }
        validate_price(new.base_price)?;
        let key = ProductKey::new(new.name, merchant.clone());
        if self.products.contains_key(&key) {
            return Err(DomainError::validation(format!(
                "Product {key} already exists."
            )));
        }
        let product = Product::new(key.clone(), new.description, new.base_price, new.category, new.stock)
            .with_image_path(new.image_path);
        self.products.insert(key.clone(), product);
        Ok(key)
    }

    /// Applies a partial update to one of `merchant`'s products.
    ///
    /// Renaming re-keys the product; the new name must not collide with
    /// another product of the same merchant. Stock cannot drop below the
    /// quantity currently reserved by pending orders.
    pub fn update_product(
        &mut self,
        merchant: &Username,
        original_name: &str,
        update: ProductUpdate,
    ) -> Result<ProductKey> {
        let key = ProductKey::new(original_name, merchant.clone());
        let current = self
            .products
            .get(&key)
            .ok_or_else(|| DomainError::not_found(format!("Product not found: {key}")))?;

        let new_key = match update.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && name != original_name => {
                let candidate = ProductKey::new(name, merchant.clone());
                if self.products.contains_key(&candidate) {
                    return Err(DomainError::validation(format!(
                        "Product {candidate} already exists."
                    )));
                }
                candidate
            }
            _ => key.clone(),
        };
        if let Some(stock) = update.stock
            && stock < current.frozen_stock
        {
            return Err(DomainError::validation(format!(
                "Stock {stock} is below the {} units reserved by pending orders.",
                current.frozen_stock
            )));
        }
        if let Some(price) = update.base_price {
            validate_price(price)?;
        }

        let Some(mut product) = self.products.remove(&key) else {
            return Err(DomainError::not_found(format!("Product not found: {key}")));
        };
        product.key = new_key.clone();
        if let Some(description) = update.description {
            product.description = description;
        }
        if let Some(price) = update.base_price {
            product.base_price = price;
        }
        if let Some(stock) = update.stock {
            product.stock = stock;
        }
        if let Some(path) = update.image_path {
            product.image_path = path;
        }
        self.products.insert(new_key.clone(), product);
        Ok(new_key)
    }

    /// Case-insensitive substring search filtered by discounted price.
    pub fn search(&self, query: &SearchQuery) -> Vec<&Product> {
        let keyword = query.keyword.trim().to_lowercase();
        self.products
            .values()
            .filter(|p| {
                let price = self.price(p);
                query.min_price.is_none_or(|min| price >= min)
                    && query.max_price.is_none_or(|max| price <= max)
            })
            .filter(|p| {
                if keyword.is_empty() {
                    return true;
                }
                let haystack = match query.field {
                    SearchField::Name => p.name(),
                    SearchField::Description => p.description.as_str(),
                };
                haystack.to_lowercase().contains(&keyword)
            })
            .collect()
    }
}

fn validate_price(price: Money) -> Result<()> {
    if price.is_negative() {
        return Err(DomainError::validation("Product price cannot be negative."));
    }
    if price > Money::MAX {
        return Err(DomainError::validation(format!(
            "Product price cannot exceed {}.",
            Money::MAX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shirt() -> ProductKey {
        ProductKey::new("Shirt", "m1")
    }

    fn ledger_with_shirt(stock: u32) -> InventoryLedger {
        let mut ledger = InventoryLedger::new();
        ledger
            .add_product(
                &Username::new("m1"),
                NewProduct {
                    name: "Shirt".into(),
                    description: "Cotton shirt".into(),
                    base_price: Money::from_whole(20),
                    stock,
                    category: Category::Clothing,
                    image_path: String::new(),
                },
            )
            .unwrap();
        ledger
    }

    #[test]
    fn test_freeze_reduces_available_by_exactly_qty() {
        let mut ledger = ledger_with_shirt(5);
        for qty in 1..=5 {
            let mut l = ledger.clone();
            l.freeze(&shirt(), qty).unwrap();
            assert_eq!(l.available_stock(&shirt()).unwrap(), 5 - qty);
            assert_eq!(l.get(&shirt()).unwrap().stock(), 5);
        }
        ledger.freeze(&shirt(), 3).unwrap();
        assert_eq!(ledger.available_stock(&shirt()).unwrap(), 2);
    }

    #[test]
    fn test_freeze_beyond_available_has_no_effect() {
        let mut ledger = ledger_with_shirt(5);
        ledger.freeze(&shirt(), 3).unwrap();

        let err = ledger.freeze(&shirt(), 3).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        let product = ledger.get(&shirt()).unwrap();
        assert_eq!(product.frozen_stock(), 3);
        assert_eq!(product.stock(), 5);
    }

    #[test]
    fn test_freeze_rejects_zero_and_unknown() {
        let mut ledger = ledger_with_shirt(5);
        assert_eq!(ledger.freeze(&shirt(), 0).unwrap_err().kind(), "ValidationError");
        let missing = ProductKey::new("Hat", "m1");
        assert_eq!(ledger.freeze(&missing, 1).unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut ledger = ledger_with_shirt(5);
        ledger.freeze(&shirt(), 2).unwrap();
        ledger.release(&shirt(), 5).unwrap();
        assert_eq!(ledger.get(&shirt()).unwrap().frozen_stock(), 0);
        assert_eq!(ledger.available_stock(&shirt()).unwrap(), 5);
    }

    #[test]
    fn test_confirm_deducts_stock_and_frozen() {
        let mut ledger = ledger_with_shirt(5);
        ledger.freeze(&shirt(), 3).unwrap();
        ledger.confirm(&shirt(), 3).unwrap();

        let product = ledger.get(&shirt()).unwrap();
        assert_eq!(product.stock(), 2);
        assert_eq!(product.frozen_stock(), 0);
    }

    #[test]
    fn test_confirm_without_reservation_is_inconsistency() {
        let mut ledger = ledger_with_shirt(5);
        let err = ledger.confirm(&shirt(), 1).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ledger.get(&shirt()).unwrap().stock(), 5);
    }

    #[test]
    fn test_unconfirm_restores_confirm() {
        let mut ledger = ledger_with_shirt(5);
        ledger.freeze(&shirt(), 2).unwrap();
        ledger.confirm(&shirt(), 2).unwrap();
        ledger.unconfirm(&shirt(), 2).unwrap();

        let product = ledger.get(&shirt()).unwrap();
        assert_eq!(product.stock(), 5);
        assert_eq!(product.frozen_stock(), 2);
    }

    #[test]
    fn test_category_discount_changes_price_immediately() {
        let mut ledger = ledger_with_shirt(5);
        assert_eq!(ledger.price_of(&shirt()).unwrap(), Money::from_whole(20));

        assert!(ledger.set_category_discount(Category::Clothing, 0.5).unwrap());
        assert_eq!(ledger.price_of(&shirt()).unwrap(), Money::from_whole(10));

        assert!(!ledger.set_category_discount(Category::Clothing, 0.5).unwrap());
        assert!(ledger.set_category_discount(Category::Food, 1.5).is_err());
        assert_eq!(ledger.discount(Category::Food), 1.0);
    }

    #[test]
    fn test_add_duplicate_product_rejected() {
        let mut ledger = ledger_with_shirt(5);
        let err = ledger
            .add_product(
                &Username::new("m1"),
                NewProduct {
                    name: "Shirt".into(),
                    description: String::new(),
                    base_price: Money::from_whole(1),
                    stock: 1,
                    category: Category::Clothing,
                    image_path: String::new(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_prices_beyond_max_rejected() {
        let mut ledger = ledger_with_shirt(5);
        let err = ledger
            .add_product(
                &Username::new("m1"),
                NewProduct {
                    name: "Yacht".into(),
                    description: String::new(),
                    base_price: Money::from_cents(5_000_000_000_000_000_000),
                    stock: 1,
                    category: Category::Food,
                    image_path: String::new(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        let err = ledger
            .update_product(
                &Username::new("m1"),
                "Shirt",
                ProductUpdate {
                    base_price: Some(Money::from_cents(Money::MAX.cents() + 1)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(ledger.price_of(&shirt()).unwrap(), Money::from_whole(20));
    }

    #[test]
    fn test_update_product_rename_and_stock_floor() {
        let mut ledger = ledger_with_shirt(5);
        ledger.freeze(&shirt(), 3).unwrap();

        let err = ledger
            .update_product(
                &Username::new("m1"),
                "Shirt",
                ProductUpdate {
                    stock: Some(2),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        let new_key = ledger
            .update_product(
                &Username::new("m1"),
                "Shirt",
                ProductUpdate {
                    name: Some("Linen Shirt".into()),
                    stock: Some(10),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!ledger.contains(&shirt()));
        let product = ledger.get(&new_key).unwrap();
        assert_eq!(product.stock(), 10);
        assert_eq!(product.frozen_stock(), 3);
    }

    #[test]
    fn test_search_by_name_and_price() {
        let mut ledger = ledger_with_shirt(5);
        ledger
            .add_product(
                &Username::new("m2"),
                NewProduct {
                    name: "Rust Book".into(),
                    description: "Learn ownership".into(),
                    base_price: Money::from_whole(40),
                    stock: 3,
                    category: Category::Book,
                    image_path: String::new(),
                },
            )
            .unwrap();

        let by_name = ledger.search(&SearchQuery {
            keyword: "shirt".into(),
            ..Default::default()
        });
        assert_eq!(by_name.len(), 1);

        let by_description = ledger.search(&SearchQuery {
            keyword: "OWNERSHIP".into(),
            field: SearchField::Description,
            ..Default::default()
        });
        assert_eq!(by_description[0].name(), "Rust Book");

        let cheap = ledger.search(&SearchQuery {
            max_price: Some(Money::from_whole(25)),
            ..Default::default()
        });
        assert_eq!(cheap.len(), 1);
        assert_eq!(cheap[0].name(), "Shirt");
    }

    #[test]
    fn test_catalog_roundtrip_clamps_frozen() {
        let json = serde_json::json!({
            "categories": { "图书": 0.8 },
            "products": [{
                "productName": "Rust Book",
                "merchantUsername": "m2",
                "description": "",
                "price": 4000,
                "category": "图书",
                "stock": 2,
                "frozenStock": 9
            }]
        });
        let catalog: Catalog = serde_json::from_value(json).unwrap();
        let ledger = InventoryLedger::from_catalog(catalog);
        let key = ProductKey::new("Rust Book", "m2");

        assert_eq!(ledger.get(&key).unwrap().frozen_stock(), 2);
        assert_eq!(ledger.price_of(&key).unwrap(), Money::from_whole(32));
    }
}

//! Per-consumer shopping carts.
//!
//! Carts are wish lists: nothing in a cart is reserved against stock.

use std::collections::{BTreeMap, HashMap};

use common::{ProductKey, Username};

use crate::error::{DomainError, Result};

/// Items of one cart, keyed by product.
pub type CartItems = BTreeMap<ProductKey, u32>;

/// Every cart, keyed by consumer.
pub type CartMap = HashMap<Username, CartItems>;

#[derive(Debug, Clone, Default)]
pub struct CartBook {
    carts: CartMap,
}

impl CartBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(mut carts: CartMap) -> Self {
        carts.retain(|_, items| {
            items.retain(|_, qty| *qty > 0);
            !items.is_empty()
        });
        Self { carts }
    }

    pub fn as_map(&self) -> &CartMap {
        &self.carts
    }

    pub fn items(&self, username: &Username) -> Option<&CartItems> {
        self.carts.get(username)
    }

    /// Adds `qty` units, merging with any quantity already in the cart.
    /// The resulting quantity may not exceed `available`.
    pub fn add(
        &mut self,
        username: &Username,
        key: ProductKey,
        qty: u32,
        available: u32,
    ) -> Result<u32> {
        if qty == 0 {
            return Err(DomainError::validation("Quantity must be positive."));
        }
        let current = self
            .carts
            .get(username)
            .and_then(|items| items.get(&key))
            .copied()
            .unwrap_or(0);
        let wanted = current.saturating_add(qty);
        if wanted > available {
            return Err(DomainError::InsufficientStock {
                product: key,
                requested: wanted,
                available,
            });
        }
        self.carts
            .entry(username.clone())
            .or_default()
            .insert(key, wanted);
        Ok(wanted)
    }

    pub fn remove(&mut self, username: &Username, key: &ProductKey) -> Result<()> {
        let items = self
            .carts
            .get_mut(username)
            .ok_or_else(|| DomainError::not_found("Cart is empty."))?;
        if items.remove(key).is_none() {
            return Err(DomainError::not_found(format!("{key} is not in the cart.")));
        }
        if items.is_empty() {
            self.carts.remove(username);
        }
        Ok(())
    }

    /// Sets the quantity of an item already in the cart. Zero removes it.
    pub fn update_quantity(
        &mut self,
        username: &Username,
        key: &ProductKey,
        qty: u32,
        available: u32,
    ) -> Result<()> {
        if qty == 0 {
            return self.remove(username, key);
        }
        if qty > available {
            return Err(DomainError::InsufficientStock {
                product: key.clone(),
                requested: qty,
                available,
            });
        }
        let slot = self
            .carts
            .get_mut(username)
            .and_then(|items| items.get_mut(key))
            .ok_or_else(|| DomainError::not_found(format!("{key} is not in the cart.")))?;
        *slot = qty;
        Ok(())
    }

    /// Empties a cart and hands back what it held so a failed payment can
    /// put it back with [`CartBook::restore`].
    pub fn clear(&mut self, username: &Username) -> Option<CartItems> {
        self.carts.remove(username)
    }

    pub fn restore(&mut self, username: &Username, items: Option<CartItems>) {
        match items {
            Some(items) if !items.is_empty() => {
                self.carts.insert(username.clone(), items);
            }
            _ => {
                self.carts.remove(username);
            }
        }
    }

    /// Moves every cart line for `from` to `to`, merging quantities.
    pub fn rename_product(&mut self, from: &ProductKey, to: &ProductKey) {
        for items in self.carts.values_mut() {
            if let Some(qty) = items.remove(from) {
                let slot = items.entry(to.clone()).or_insert(0);
                *slot = slot.saturating_add(qty);
            }
        }
    }

    /// Drops cart lines whose product no longer exists.
    pub fn retain_products(&mut self, mut exists: impl FnMut(&ProductKey) -> bool) {
        self.carts.retain(|_, items| {
            items.retain(|key, _| exists(key));
            !items.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Username {
        Username::new("alice")
    }

    fn shirt() -> ProductKey {
        ProductKey::new("Shirt", "m1")
    }

    #[test]
    fn test_add_merges_and_checks_available() {
        let mut book = CartBook::new();
        assert_eq!(book.add(&alice(), shirt(), 2, 5).unwrap(), 2);
        assert_eq!(book.add(&alice(), shirt(), 3, 5).unwrap(), 5);

        let err = book.add(&alice(), shirt(), 1, 5).unwrap_err();
        assert_eq!(err.kind(), "InsufficientStock");
        assert_eq!(book.items(&alice()).unwrap()[&shirt()], 5);
    }

    #[test]
    fn test_update_and_remove() {
        let mut book = CartBook::new();
        book.add(&alice(), shirt(), 1, 5).unwrap();

        assert!(book.update_quantity(&alice(), &shirt(), 6, 5).is_err());
        book.update_quantity(&alice(), &shirt(), 4, 5).unwrap();
        assert_eq!(book.items(&alice()).unwrap()[&shirt()], 4);

        book.update_quantity(&alice(), &shirt(), 0, 5).unwrap();
        assert!(book.items(&alice()).is_none());
        assert_eq!(book.remove(&alice(), &shirt()).unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_clear_and_restore() {
        let mut book = CartBook::new();
        book.add(&alice(), shirt(), 2, 5).unwrap();

        let saved = book.clear(&alice());
        assert!(book.items(&alice()).is_none());

        book.restore(&alice(), saved);
        assert_eq!(book.items(&alice()).unwrap()[&shirt()], 2);
    }

    #[test]
    fn test_rename_product_follows_the_item() {
        let mut book = CartBook::new();
        let linen = ProductKey::new("Linen", "m1");
        book.add(&alice(), shirt(), 2, 5).unwrap();
        book.add(&Username::new("bob"), ProductKey::new("Hat", "m1"), 1, 5)
            .unwrap();

        book.rename_product(&shirt(), &linen);
        let items = book.items(&alice()).unwrap();
        assert_eq!(items.get(&linen), Some(&2));
        assert!(!items.contains_key(&shirt()));
        assert_eq!(book.items(&Username::new("bob")).unwrap().len(), 1);
    }

    #[test]
    fn test_retain_products_drops_unknown() {
        let mut book = CartBook::new();
        book.add(&alice(), shirt(), 2, 5).unwrap();
        book.retain_products(|_| false);
        assert!(book.as_map().is_empty());
    }
}

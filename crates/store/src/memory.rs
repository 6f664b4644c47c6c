use std::sync::Arc;

use async_trait::async_trait;
use domain::{Account, CartMap, Catalog, Order};
use tokio::sync::RwLock;

use crate::{Result, Store, StoreError};

#[derive(Debug, Default)]
struct InMemoryState {
    catalog: Catalog,
    users: Vec<Account>,
    orders: Vec<Order>,
    carts: CartMap,
    fail_on_save: bool,
    saves: usize,
}

/// In-memory store for testing.
///
/// Saves can be switched to fail so callers' rollback paths can be
/// exercised.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every subsequent save to fail.
    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.write().await.fail_on_save = fail;
    }

    /// Returns the number of successful saves so far.
    pub async fn save_count(&self) -> usize {
        self.state.read().await.saves
    }

    async fn guard_save(&self) -> Result<tokio::sync::RwLockWriteGuard<'_, InMemoryState>> {
        let mut state = self.state.write().await;
        if state.fail_on_save {
            return Err(StoreError::Unavailable("save rejected".to_string()));
        }
        state.saves += 1;
        Ok(state)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_all_products(&self) -> Result<Catalog> {
        Ok(self.state.read().await.catalog.clone())
    }

    async fn save_all_products(&self, catalog: &Catalog) -> Result<()> {
        self.guard_save().await?.catalog = catalog.clone();
        Ok(())
    }

    async fn load_all_users(&self) -> Result<Vec<Account>> {
        Ok(self.state.read().await.users.clone())
    }

    async fn save_user(&self, account: &Account) -> Result<()> {
        let mut state = self.guard_save().await?;
        match state
            .users
            .iter_mut()
            .find(|a| a.username == account.username)
        {
            Some(existing) => *existing = account.clone(),
            None => state.users.push(account.clone()),
        }
        Ok(())
    }

    async fn load_orders(&self) -> Result<Vec<Order>> {
        Ok(self.state.read().await.orders.clone())
    }

    async fn save_orders(&self, orders: &[Order]) -> Result<()> {
        self.guard_save().await?.orders = orders.to_vec();
        Ok(())
    }

    async fn load_all_carts(&self) -> Result<CartMap> {
        Ok(self.state.read().await.carts.clone())
    }

    async fn save_carts(&self, carts: &CartMap) -> Result<()> {
        self.guard_save().await?.carts = carts.clone();
        Ok(())
    }
}

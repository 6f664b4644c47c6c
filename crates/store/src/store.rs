use async_trait::async_trait;
use domain::{Account, CartMap, Catalog, Order};

use crate::Result;

/// Durable storage for products, accounts, orders and carts.
///
/// All implementations must be thread-safe (Send + Sync). Loads of a
/// collection that was never saved return an empty collection.
#[async_trait]
pub trait Store: Send + Sync {
    /// Loads the discount table and every product.
    async fn load_all_products(&self) -> Result<Catalog>;

    /// Replaces the stored catalog.
    async fn save_all_products(&self, catalog: &Catalog) -> Result<()>;

    async fn load_all_users(&self) -> Result<Vec<Account>>;

    /// Inserts or replaces one account, keyed by username.
    async fn save_user(&self, account: &Account) -> Result<()>;

    /// Saves several accounts. Implementations may batch the write.
    async fn save_users(&self, accounts: &[Account]) -> Result<()> {
        for account in accounts {
            self.save_user(account).await?;
        }
        Ok(())
    }

    async fn load_orders(&self) -> Result<Vec<Order>>;

    /// Replaces the stored order list.
    async fn save_orders(&self, orders: &[Order]) -> Result<()>;

    async fn load_all_carts(&self) -> Result<CartMap>;

    /// Replaces every stored cart.
    async fn save_carts(&self, carts: &CartMap) -> Result<()>;
}

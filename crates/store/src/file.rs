//! JSON-file backed store.
//!
//! One file per collection in a single data directory:
//! `products.json`, `users.json`, `orders.json` and `carts.json`.
//! Writes go to a sibling temp file which is then renamed over the target.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use common::{ProductKey, Username};
use domain::{Account, CartMap, Catalog, Order};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;

use crate::{Result, Store, StoreError};

const PRODUCTS_FILE: &str = "products.json";
const USERS_FILE: &str = "users.json";
const ORDERS_FILE: &str = "orders.json";
const CARTS_FILE: &str = "carts.json";

/// Persisted form of one cart line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartEntry {
    #[serde(flatten)]
    key: ProductKey,
    quantity: u32,
}

type CartFile = std::collections::BTreeMap<Username, Vec<CartEntry>>;

#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "data file missing, starting empty");
                return Ok(T::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialization {
            path: path.display().to_string(),
            source,
        })
    }

    async fn write<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        let start = Instant::now();
        let path = self.dir.join(file);
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialization {
            path: path.display().to_string(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let tmp = self.dir.join(format!("{file}.tmp"));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        metrics::histogram!("store_write_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::trace!(path = %path.display(), bytes = bytes.len(), "data file written");
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load_all_products(&self) -> Result<Catalog> {
        self.read(PRODUCTS_FILE).await
    }

    async fn save_all_products(&self, catalog: &Catalog) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(PRODUCTS_FILE, catalog).await
    }

    async fn load_all_users(&self) -> Result<Vec<Account>> {
        self.read(USERS_FILE).await
    }

    async fn save_user(&self, account: &Account) -> Result<()> {
        self.save_users(std::slice::from_ref(account)).await
    }

    async fn save_users(&self, accounts: &[Account]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut users: Vec<Account> = self.read(USERS_FILE).await?;
        for account in accounts {
            match users.iter_mut().find(|a| a.username == account.username) {
                Some(existing) => *existing = account.clone(),
                None => users.push(account.clone()),
            }
        }
        self.write(USERS_FILE, &users).await
    }

    async fn load_orders(&self) -> Result<Vec<Order>> {
        self.read(ORDERS_FILE).await
    }

    async fn save_orders(&self, orders: &[Order]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(ORDERS_FILE, orders).await
    }

    async fn load_all_carts(&self) -> Result<CartMap> {
        let file: CartFile = self.read(CARTS_FILE).await?;
        Ok(file
            .into_iter()
            .map(|(user, entries)| {
                let items = entries.into_iter().map(|e| (e.key, e.quantity)).collect();
                (user, items)
            })
            .collect())
    }

    async fn save_carts(&self, carts: &CartMap) -> Result<()> {
        let file: CartFile = carts
            .iter()
            .map(|(user, items)| {
                let entries = items
                    .iter()
                    .map(|(key, qty)| CartEntry {
                        key: key.clone(),
                        quantity: *qty,
                    })
                    .collect();
                (user.clone(), entries)
            })
            .collect();
        let _guard = self.write_lock.lock().await;
        self.write(CARTS_FILE, &file).await
    }
}

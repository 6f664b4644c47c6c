//! The market service: shared state, persistence and notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductKey, Username};
use domain::{
    BalanceLedger, Category, DomainError, Money, NewProduct, OrderStatus, Product, ProductUpdate,
    Result, Role, SearchQuery,
};
use store::Store;
use tokio::sync::{Mutex, broadcast};

use crate::clock::Clock;
use crate::events::MarketEvent;
use crate::lifecycle::{OrderLifecycleManager, OrderSummary};
use crate::state::MarketState;

const EVENT_CAPACITY: usize = 1024;

/// Public view of an account after login.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountView {
    pub username: Username,
    pub role: Role,
    pub balance: Money,
}

/// A product together with its category discount and the price it yields,
/// read under one lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductView {
    pub product: Product,
    pub price: Money,
    pub discount: f64,
}

impl ProductView {
    fn of(state: &MarketState, product: &Product) -> Self {
        Self {
            product: product.clone(),
            price: state.inventory.price(product),
            discount: state.inventory.discount(product.category),
        }
    }
}

/// One cart line with the product it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub product: Product,
    pub price: Money,
    pub quantity: u32,
}

/// Coordinates every ledger behind a single lock.
///
/// Each operation that reads then writes holds the lock for its whole
/// critical section, including the save it triggers, so a failed save can be
/// rolled back before any other caller sees the intermediate state.
pub struct Market {
    state: Mutex<MarketState>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    lifecycle: OrderLifecycleManager,
    events: broadcast::Sender<MarketEvent>,
}

impl Market {
    pub fn new(state: MarketState, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(state),
            store,
            clock,
            lifecycle: OrderLifecycleManager::new(),
            events,
        }
    }

    /// Loads every collection from `store` and reconciles reservations.
    #[tracing::instrument(skip_all)]
    pub async fn load(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Result<Self> {
        let catalog = store.load_all_products().await?;
        let accounts = store.load_all_users().await?;
        let orders = store.load_orders().await?;
        let carts = store.load_all_carts().await?;

        let mut state = MarketState::from_parts(catalog, accounts, orders, carts);
        let report = state.reconcile();
        tracing::info!(
            products = state.inventory.len(),
            accounts = state.accounts.len(),
            orders = state.orders.len(),
            pending = report.restored_reservations,
            dropped = report.dropped_orders,
            cancelled = report.cancelled_orders,
            "market state loaded"
        );

        let market = Self::new(state, store, clock);
        if report.changed() {
            let state = market.state.lock().await;
            market.save_catalog_and_orders(&state).await?;
        }
        Ok(market)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- Accounts --

    #[tracing::instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str, role: Role) -> Result<()> {
        let mut state = self.state.lock().await;
        let account = state.accounts.register(username, password, role)?.clone();
        if let Err(e) = self.store.save_user(&account).await {
            state.accounts.remove(&account.username);
            return Err(e.into());
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<AccountView> {
        let state = self.state.lock().await;
        let account = state.accounts.authenticate(username, password)?;
        tracing::info!(username = %account.username, role = %account.role, "login");
        Ok(AccountView {
            username: account.username.clone(),
            role: account.role,
            balance: account.balance(),
        })
    }

    #[tracing::instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        username: &Username,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let previous = Self::account(&state, username)?;
        state
            .accounts
            .change_password(username, old_password, new_password)?;
        if let Err(e) = self.save_users(&state, std::slice::from_ref(username)).await {
            state.accounts.insert(previous);
            return Err(e);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn recharge(&self, username: &Username, amount: Money) -> Result<Money> {
        let mut state = self.state.lock().await;
        let previous = Self::account(&state, username)?;
        let balance = state.accounts.recharge(username, amount)?;
        if let Err(e) = self.save_users(&state, std::slice::from_ref(username)).await {
            state.accounts.insert(previous);
            return Err(e);
        }
        self.publish(MarketEvent::BalanceChanged {
            username: username.clone(),
            balance,
        });
        Ok(balance)
    }

    pub async fn balance(&self, username: &Username) -> Result<Money> {
        self.state.lock().await.accounts.balance(username)
    }

    // -- Catalog --

    pub async fn products(&self) -> Vec<ProductView> {
        let state = self.state.lock().await;
        state
            .inventory
            .products()
            .map(|p| ProductView::of(&state, p))
            .collect()
    }

    pub async fn search_products(&self, query: &SearchQuery) -> Vec<ProductView> {
        let state = self.state.lock().await;
        state
            .inventory
            .search(query)
            .into_iter()
            .map(|p| ProductView::of(&state, p))
            .collect()
    }

    #[tracing::instrument(skip(self, product), fields(product = %product.name))]
    pub async fn add_product(&self, merchant: &Username, product: NewProduct) -> Result<ProductKey> {
        let mut state = self.state.lock().await;
        Self::require_merchant(&state, merchant)?;
        let before = state.inventory.clone();
        let key = state.inventory.add_product(merchant, product)?;
        if let Err(e) = self.save_catalog(&state).await {
            state.inventory = before;
            return Err(e);
        }
        self.publish(MarketEvent::CatalogChanged);
        Ok(key)
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update_product(
        &self,
        merchant: &Username,
        original_name: &str,
        update: ProductUpdate,
    ) -> Result<ProductKey> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        Self::require_merchant(state, merchant)?;
        let before = state.inventory.clone();
        let key = state
            .inventory
            .update_product(merchant, original_name, update)?;
        let previous_key = ProductKey::new(original_name, merchant.clone());

        if key == previous_key {
            if let Err(e) = self.save_catalog(state).await {
                state.inventory = before;
                return Err(e);
            }
        } else {
            self.commit_rename(state, before, &previous_key, &key).await?;
        }
        self.publish(MarketEvent::CatalogChanged);
        self.publish_stock(state, &key);
        Ok(key)
    }

    /// Points orders and carts at a renamed product and saves all three
    /// collections, or puts everything back.
    async fn commit_rename(
        &self,
        state: &mut MarketState,
        inventory_before: domain::InventoryLedger,
        from: &ProductKey,
        to: &ProductKey,
    ) -> Result<()> {
        let orders_before = state.orders.clone();
        let carts_before = state.carts.clone();
        let moved = state.orders.rename_product(from, to);
        state.carts.rename_product(from, to);

        let saved = match self.save_catalog_and_orders(state).await {
            Ok(()) => self.save_carts(state).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            tracing::error!(%from, %to, error = %e, "rename not persisted, rolling back");
            state.inventory = inventory_before;
            state.orders = orders_before;
            state.carts = carts_before;
            if let Err(resave) = self.save_catalog_and_orders(state).await {
                tracing::warn!(error = %resave, "re-save after rename rollback failed");
            }
            return Err(e);
        }
        tracing::info!(%from, %to, orders = moved, "product renamed");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_category_discount(
        &self,
        merchant: &Username,
        category: Category,
        factor: f64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::require_merchant(&state, merchant)?;
        let before = state.inventory.discount(category);
        if !state.inventory.set_category_discount(category, factor)? {
            return Ok(());
        }
        if let Err(e) = self.save_catalog(&state).await {
            state.inventory.set_category_discount(category, before)?;
            return Err(e);
        }
        self.publish(MarketEvent::CatalogChanged);
        Ok(())
    }

    // -- Carts --

    pub async fn cart(&self, username: &Username) -> Vec<CartLine> {
        let state = self.state.lock().await;
        let Some(items) = state.carts.items(username) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|(key, quantity)| {
                let product = state.inventory.get(key)?;
                Some(CartLine {
                    product: product.clone(),
                    price: state.inventory.price(product),
                    quantity: *quantity,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(&self, username: &Username, key: ProductKey, qty: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let available = state.inventory.available_stock(&key)?;
        let before = state.carts.items(username).cloned();
        state.carts.add(username, key, qty, available)?;
        self.commit_cart(&mut state, username, before).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_from_cart(&self, username: &Username, key: &ProductKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.carts.items(username).cloned();
        state.carts.remove(username, key)?;
        self.commit_cart(&mut state, username, before).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_cart_quantity(
        &self,
        username: &Username,
        key: &ProductKey,
        qty: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let available = state.inventory.available_stock(key)?;
        let before = state.carts.items(username).cloned();
        state.carts.update_quantity(username, key, qty, available)?;
        self.commit_cart(&mut state, username, before).await
    }

    async fn commit_cart(
        &self,
        state: &mut MarketState,
        username: &Username,
        before: Option<domain::CartItems>,
    ) -> Result<()> {
        if let Err(e) = self.save_carts(state).await {
            state.carts.restore(username, before);
            return Err(e);
        }
        Ok(())
    }

    // -- Orders --

    /// Reserves stock for `items` and records a pending order.
    #[tracing::instrument(skip(self, items))]
    pub async fn prepare_order(
        &self,
        consumer: &Username,
        items: &[(ProductKey, u32)],
    ) -> Result<OrderSummary> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let summary = self.lifecycle.prepare_order(
            &mut state.inventory,
            &mut state.orders,
            consumer,
            items,
            now,
        )?;
        let order_id = summary.order.id();

        if let Err(e) = self.save_catalog_and_orders(state).await {
            tracing::error!(%order_id, error = %e, "order not persisted, releasing reservation");
            self.lifecycle
                .discard_order(&mut state.inventory, &mut state.orders, order_id);
            if let Err(resave) = self.save_catalog_and_orders(state).await {
                tracing::warn!(%order_id, error = %resave, "re-save after discard failed");
            }
            return Err(e);
        }

        for line in summary.order.lines() {
            self.publish_stock(state, &line.key);
        }
        self.publish_order(consumer, order_id, OrderStatus::Pending);
        Ok(summary)
    }

    /// Pays a pending order. Returns the consumer's new balance.
    ///
    /// If the result cannot be saved, the payment is rolled back in full:
    /// balances, stock, the consumer's cart and the order status.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(&self, consumer: &Username, order_id: OrderId) -> Result<Money> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let paid = self.lifecycle.pay_order(
            &mut state.inventory,
            &mut state.orders,
            &mut state.accounts,
            order_id,
            consumer,
            now,
        );
        let payment = match paid {
            Ok(payment) => payment,
            Err(err @ DomainError::OrderExpired(_)) => {
                if let Err(e) = self.save_catalog_and_orders(state).await {
                    tracing::error!(%order_id, error = %e, "failed to persist expired order");
                }
                self.publish_order(consumer, order_id, OrderStatus::Cancelled);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let saved_cart = state.carts.clear(consumer);
        let mut touched: Vec<Username> = payment
            .receipt
            .steps
            .iter()
            .map(|s| s.username().clone())
            .collect();
        touched.sort();
        touched.dedup();

        if let Err(e) = self.save_payment(state, &touched).await {
            tracing::error!(%order_id, error = %e, "payment not persisted, rolling back");
            if let Err(rb) = self.lifecycle.rollback_payment(
                &mut state.inventory,
                &mut state.orders,
                &mut state.accounts,
                &payment,
            ) {
                tracing::error!(%order_id, error = %rb, "payment rollback incomplete");
            }
            state.carts.restore(consumer, saved_cart);
            if let Err(resave) = self.save_payment(state, &touched).await {
                tracing::warn!(%order_id, error = %resave, "re-save after rollback failed");
            }
            return Err(e);
        }

        for line in payment.order.lines() {
            self.publish_stock(state, &line.key);
        }
        for username in &touched {
            if let Ok(balance) = state.accounts.balance(username) {
                self.publish(MarketEvent::BalanceChanged {
                    username: username.clone(),
                    balance,
                });
            }
        }
        self.publish_order(consumer, order_id, OrderStatus::Paid);
        Ok(payment.new_balance())
    }

    /// Cancels every pending order past its window. Saves only when
    /// something changed.
    #[tracing::instrument(skip(self))]
    pub async fn check_timeout_orders(&self) -> Result<Vec<OrderId>> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let cancelled =
            self.lifecycle
                .check_timeout_orders(&mut state.inventory, &mut state.orders, now);
        if cancelled.is_empty() {
            return Ok(cancelled);
        }
        self.save_catalog_and_orders(state).await?;
        for id in &cancelled {
            if let Some(order) = state.orders.get(id) {
                for line in order.lines() {
                    self.publish_stock(state, &line.key);
                }
                self.publish_order(order.consumer(), *id, OrderStatus::Cancelled);
            }
        }
        Ok(cancelled)
    }

    /// A consumer's orders, newest first.
    pub async fn orders_for(&self, consumer: &Username) -> Vec<OrderSummary> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        self.lifecycle.orders_for(&state.orders, consumer, now)
    }

    /// Writes every collection. Used on shutdown.
    pub async fn save_all(&self) -> Result<()> {
        let state = self.state.lock().await;
        let users: Vec<Username> = state.accounts.accounts().map(|a| a.username.clone()).collect();
        self.save_catalog(&state).await?;
        self.save_users(&state, &users).await?;
        self.save_orders(&state).await?;
        self.save_carts(&state).await
    }

    /// Runs `f` against the current state. Intended for inspection.
    pub async fn inspect<T>(&self, f: impl FnOnce(&MarketState) -> T) -> T {
        let state = self.state.lock().await;
        f(&state)
    }

    // -- Helpers --

    fn account(state: &MarketState, username: &Username) -> Result<domain::Account> {
        state
            .accounts
            .get(username)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("User not found: {username}")))
    }

    fn require_merchant(state: &MarketState, username: &Username) -> Result<()> {
        match state.accounts.get(username) {
            Some(account) if account.role.is_merchant() => Ok(()),
            Some(_) => Err(DomainError::permission_denied(
                "Permission denied: merchant account required.",
            )),
            None => Err(DomainError::permission_denied("Not logged in.")),
        }
    }

    async fn save_catalog(&self, state: &MarketState) -> Result<()> {
        Ok(self
            .store
            .save_all_products(&state.inventory.to_catalog())
            .await?)
    }

    async fn save_orders(&self, state: &MarketState) -> Result<()> {
        Ok(self.store.save_orders(&state.orders.to_vec()).await?)
    }

    async fn save_carts(&self, state: &MarketState) -> Result<()> {
        Ok(self.store.save_carts(state.carts.as_map()).await?)
    }

    async fn save_users(&self, state: &MarketState, usernames: &[Username]) -> Result<()> {
        let accounts: Vec<domain::Account> = usernames
            .iter()
            .filter_map(|u| state.accounts.get(u).cloned())
            .collect();
        Ok(self.store.save_users(&accounts).await?)
    }

    /// Frozen stock in the catalog is rebuilt from pending orders on load,
    /// so the catalog goes first.
    async fn save_catalog_and_orders(&self, state: &MarketState) -> Result<()> {
        self.save_catalog(state).await?;
        self.save_orders(state).await
    }

    async fn save_payment(&self, state: &MarketState, usernames: &[Username]) -> Result<()> {
        self.save_catalog_and_orders(state).await?;
        self.save_users(state, usernames).await?;
        self.save_carts(state).await
    }

    fn publish(&self, event: MarketEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn publish_stock(&self, state: &MarketState, key: &ProductKey) {
        if let Some(product) = state.inventory.get(key) {
            self.publish(MarketEvent::StockChanged {
                product: key.clone(),
                stock: product.stock(),
                frozen_stock: product.frozen_stock(),
            });
        }
    }

    fn publish_order(&self, consumer: &Username, order_id: OrderId, status: OrderStatus) {
        self.publish(MarketEvent::OrderStatusChanged {
            order_id,
            consumer: consumer.clone(),
            status,
        });
    }
}

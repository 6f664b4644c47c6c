//! Per-connection request routing.

use std::sync::Arc;

use common::{OrderId, Username};
use domain::{
    Category, DomainError, Money, NewProduct, ProductUpdate, Result, Role, SearchField,
    SearchQuery,
};
use market::Market;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::protocol::{
    Action, AddProductPayload, CartItemPayload, CartItemDto, CartQuantityPayload,
    ChangePasswordPayload, DiscountPayload, LoginPayload, OrderDto, PayOrderPayload,
    PrepareOrderPayload, ProductDto, ProductRef, RechargePayload, RegisterPayload, Request,
    Response, SearchPayload, UpdateProductPayload,
};

/// The identity bound to a connection by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: Username,
    pub role: Role,
}

/// Routes requests from one connection to the market.
///
/// Holds the connection's session, which is set once by `login` and never
/// changes afterwards.
pub struct Dispatcher {
    market: Arc<Market>,
    session: Option<Session>,
}

impl Dispatcher {
    pub fn new(market: Arc<Market>) -> Self {
        Self {
            market,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Handles one framed line and returns the response to write back.
    pub async fn handle_line(&mut self, line: &[u8]) -> Response {
        let request: Request = match serde_json::from_slice(line) {
            Ok(request) => request,
            Err(e) => {
                metrics::counter!("requests_total", "action" => "malformed").increment(1);
                tracing::debug!(error = %e, "malformed request");
                return Response::malformed(e);
            }
        };
        self.handle(request).await
    }

    pub async fn handle(&mut self, request: Request) -> Response {
        let Request {
            action,
            payload,
            request_id,
        } = request;

        let Some(parsed) = Action::parse(&action) else {
            metrics::counter!("requests_total", "action" => "unknown").increment(1);
            let err = DomainError::Protocol(format!("Unknown action: {action}"));
            return Response::error(action, &err).with_request_id(request_id);
        };
        metrics::counter!("requests_total", "action" => parsed.as_str()).increment(1);

        let response = match self.route(parsed, payload).await {
            Ok(data) => Response::success(action, data),
            Err(e) => {
                tracing::debug!(action = %parsed, kind = e.kind(), error = %e, "request failed");
                Response::error(action, &e)
            }
        };
        response.with_request_id(request_id)
    }

    #[tracing::instrument(skip(self, payload), fields(user = self.session.as_ref().map(|s| s.username.as_str())))]
    async fn route(&mut self, action: Action, payload: Value) -> Result<Value> {
        match action {
            Action::Login => self.login(parse(payload)?).await,
            Action::Register => {
                let p: RegisterPayload = parse(payload)?;
                let role: Role = p.role.parse()?;
                self.market.register(&p.username, &p.password, role).await?;
                Ok(json!({}))
            }
            Action::ChangePassword => {
                let user = self.require_user()?.clone();
                let p: ChangePasswordPayload = parse(payload)?;
                self.market
                    .change_password(&user, &p.old_pwd, &p.new_pwd)
                    .await?;
                Ok(json!({}))
            }
            Action::Recharge => {
                let user = self.require_user()?;
                let p: RechargePayload = parse(payload)?;
                let balance = self.market.recharge(user, money(p.amount)?).await?;
                Ok(json!({ "newBalance": balance.as_units() }))
            }
            Action::GetBalance => {
                let user = self.require_user()?;
                let balance = self.market.balance(user).await?;
                Ok(json!({ "balance": balance.as_units() }))
            }
            Action::GetProducts => {
                let products = self.market.products().await;
                Ok(json!({ "products": Self::product_dtos(products) }))
            }
            Action::SearchProducts => {
                let p: SearchPayload = parse(payload)?;
                let query = SearchQuery {
                    keyword: p.keyword,
                    field: SearchField::from_code(p.search_type),
                    min_price: price_bound(p.min_price)?,
                    max_price: price_bound(p.max_price)?,
                };
                let products = self.market.search_products(&query).await;
                Ok(json!({ "products": Self::product_dtos(products) }))
            }
            Action::AddProduct => {
                let merchant = self.require_merchant()?;
                let p: AddProductPayload = parse(payload)?;
                let product = NewProduct {
                    name: p.name,
                    description: p.description,
                    base_price: money(p.price)?,
                    stock: p.stock,
                    category: p.category.parse()?,
                    image_path: p.image_path,
                };
                self.market.add_product(merchant, product).await?;
                Ok(json!({}))
            }
            Action::UpdateProduct => {
                let merchant = self.require_merchant()?;
                let p: UpdateProductPayload = parse(payload)?;
                let update = ProductUpdate {
                    name: p.name,
                    description: p.description,
                    base_price: p.price.map(money).transpose()?,
                    stock: p.stock,
                    image_path: p.image_path,
                };
                self.market
                    .update_product(merchant, &p.original_name, update)
                    .await?;
                Ok(json!({}))
            }
            Action::SetCategoryDiscount => {
                let merchant = self.require_merchant()?;
                let p: DiscountPayload = parse(payload)?;
                let category: Category = p.category.parse()?;
                self.market
                    .set_category_discount(merchant, category, p.discount)
                    .await?;
                Ok(json!({}))
            }
            Action::GetCart => {
                let user = self.require_user()?;
                let items: Vec<CartItemDto> =
                    self.market.cart(user).await.iter().map(CartItemDto::from).collect();
                Ok(json!({ "items": items }))
            }
            Action::AddToCart => {
                let user = self.require_user()?;
                let p: CartItemPayload = parse(payload)?;
                self.market
                    .add_to_cart(user, p.product.key(), p.quantity)
                    .await?;
                Ok(json!({}))
            }
            Action::RemoveFromCart => {
                let user = self.require_user()?;
                let p: ProductRef = parse(payload)?;
                self.market.remove_from_cart(user, &p.key()).await?;
                Ok(json!({}))
            }
            Action::UpdateCartQuantity => {
                let user = self.require_user()?;
                let p: CartQuantityPayload = parse(payload)?;
                self.market
                    .update_cart_quantity(user, &p.product.key(), p.new_quantity)
                    .await?;
                Ok(json!({}))
            }
            Action::PrepareOrder => {
                let user = self.require_user()?;
                let p: PrepareOrderPayload = parse(payload)?;
                let items: Vec<_> = p
                    .items_data
                    .iter()
                    .map(|item| (item.product.key(), item.quantity))
                    .collect();
                let summary = self.market.prepare_order(user, &items).await?;
                Ok(serde_json::to_value(OrderDto::from(&summary)).map_err(invalid_output)?)
            }
            Action::PayOrder => {
                let user = self.require_user()?;
                let p: PayOrderPayload = parse(payload)?;
                let order_id = OrderId::parse(&p.order_id).ok_or_else(|| {
                    DomainError::not_found(format!("Order not found: {}", p.order_id))
                })?;
                let balance = self.market.pay_order(user, order_id).await?;
                Ok(json!({ "newBalance": balance.as_units() }))
            }
            Action::GetOrders => {
                let user = self.require_user()?;
                let orders: Vec<OrderDto> = self
                    .market
                    .orders_for(user)
                    .await
                    .iter()
                    .map(OrderDto::from)
                    .collect();
                Ok(json!({ "orders": orders }))
            }
        }
    }

    async fn login(&mut self, p: LoginPayload) -> Result<Value> {
        if let Some(session) = &self.session {
            return Err(DomainError::invalid_state(format!(
                "Already logged in as {}.",
                session.username
            )));
        }
        let account = self.market.login(&p.username, &p.password).await?;
        self.session = Some(Session {
            username: account.username.clone(),
            role: account.role,
        });
        Ok(json!({
            "username": account.username,
            "type": account.role.as_str(),
            "balance": account.balance.as_units(),
        }))
    }

    fn require_user(&self) -> Result<&Username> {
        self.session
            .as_ref()
            .map(|s| &s.username)
            .ok_or_else(|| DomainError::permission_denied("Not logged in."))
    }

    fn require_merchant(&self) -> Result<&Username> {
        match &self.session {
            Some(s) if s.role.is_merchant() => Ok(&s.username),
            Some(_) => Err(DomainError::permission_denied(
                "Permission denied: merchant account required.",
            )),
            None => Err(DomainError::permission_denied("Not logged in.")),
        }
    }

    fn product_dtos(products: Vec<market::ProductView>) -> Vec<ProductDto> {
        products.iter().map(ProductDto::from_view).collect()
    }
}

/// Deserializes an action payload. A missing payload reads as `{}`.
fn parse<T: DeserializeOwned>(payload: Value) -> Result<T> {
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    };
    serde_json::from_value(payload)
        .map_err(|e| DomainError::validation(format!("Invalid payload: {e}")))
}

fn money(units: f64) -> Result<Money> {
    Money::from_units(units).ok_or_else(|| DomainError::validation("Invalid amount."))
}

/// Negative bounds mean "unbounded".
fn price_bound(bound: Option<f64>) -> Result<Option<Money>> {
    match bound {
        Some(v) if v >= 0.0 => money(v).map(Some),
        _ => Ok(None),
    }
}

fn invalid_output(e: serde_json::Error) -> DomainError {
    DomainError::Protocol(format!("Failed to encode response: {e}"))
}

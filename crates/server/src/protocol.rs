//! Wire messages: request and response envelopes, action payloads and the
//! JSON views returned in `data`.
//!
//! Monetary values cross the wire as currency units with two decimals.

use common::ProductKey;
use domain::{DomainError, Money, OrderLine};
use market::{CartLine, OrderSummary, ProductView};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `response_to_action` used when the request line was not valid JSON.
pub const MALFORMED_ACTION: &str = "unknown_malformed";

/// Every action the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Login,
    Register,
    ChangePassword,
    Recharge,
    GetBalance,
    GetProducts,
    SearchProducts,
    AddProduct,
    UpdateProduct,
    SetCategoryDiscount,
    GetCart,
    AddToCart,
    RemoveFromCart,
    UpdateCartQuantity,
    PrepareOrder,
    PayOrder,
    GetOrders,
}

impl Action {
    pub const ALL: [Action; 17] = [
        Action::Login,
        Action::Register,
        Action::ChangePassword,
        Action::Recharge,
        Action::GetBalance,
        Action::GetProducts,
        Action::SearchProducts,
        Action::AddProduct,
        Action::UpdateProduct,
        Action::SetCategoryDiscount,
        Action::GetCart,
        Action::AddToCart,
        Action::RemoveFromCart,
        Action::UpdateCartQuantity,
        Action::PrepareOrder,
        Action::PayOrder,
        Action::GetOrders,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::Register => "register",
            Action::ChangePassword => "changePassword",
            Action::Recharge => "recharge",
            Action::GetBalance => "getBalance",
            Action::GetProducts => "getProducts",
            Action::SearchProducts => "searchProducts",
            Action::AddProduct => "addProduct",
            Action::UpdateProduct => "updateProduct",
            Action::SetCategoryDiscount => "setCategoryDiscount",
            Action::GetCart => "getCart",
            Action::AddToCart => "addToCart",
            Action::RemoveFromCart => "removeFromCart",
            Action::UpdateCartQuantity => "updateCartQuantity",
            Action::PrepareOrder => "prepareOrder",
            Action::PayOrder => "payOrder",
            Action::GetOrders => "getOrders",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response_to_action: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(
        default,
        rename = "requestId",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<Value>,
}

impl Response {
    pub fn success(action: impl Into<String>, data: Value) -> Self {
        Self {
            response_to_action: action.into(),
            status: Status::Success,
            data: Some(data),
            message: None,
            kind: None,
            request_id: None,
        }
    }

    /// Error response for `err`. An order owned by someone else is reported
    /// as not found.
    pub fn error(action: impl Into<String>, err: &DomainError) -> Self {
        let (kind, message) = match err {
            DomainError::WrongOwner { order_id, .. } => {
                ("NotFound", format!("Order not found: {order_id}"))
            }
            other => (other.kind(), other.to_string()),
        };
        Self {
            response_to_action: action.into(),
            status: Status::Error,
            data: None,
            message: Some(message),
            kind: Some(kind.to_string()),
            request_id: None,
        }
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::error(
            MALFORMED_ACTION,
            &DomainError::Protocol(format!("Malformed request: {detail}")),
        )
    }

    pub fn with_request_id(mut self, request_id: Option<Value>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

// -- Payloads --

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    pub password: String,
    #[serde(rename = "type")]
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordPayload {
    pub old_pwd: String,
    pub new_pwd: String,
}

#[derive(Debug, Deserialize)]
pub struct RechargePayload {
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub search_type: i64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProductPayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub stock: u32,
    pub category: String,
    #[serde(default)]
    pub image_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductPayload {
    pub original_name: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<u32>,
    pub image_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiscountPayload {
    pub category: String,
    pub discount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    pub product_name: String,
    pub merchant_username: String,
}

impl ProductRef {
    pub fn key(&self) -> ProductKey {
        ProductKey::new(self.product_name.as_str(), self.merchant_username.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct CartItemPayload {
    #[serde(flatten)]
    pub product: ProductRef,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartQuantityPayload {
    #[serde(flatten)]
    pub product: ProductRef,
    pub new_quantity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareOrderPayload {
    pub items_data: Vec<CartItemPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayOrderPayload {
    pub order_id: String,
}

// -- Views --

fn units(money: Money) -> f64 {
    money.as_units()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
    pub name: String,
    pub description: String,
    pub base_price: f64,
    pub price: f64,
    pub stock: u32,
    pub available_stock: u32,
    pub category: String,
    pub image_path: String,
    pub merchant_username: String,
    pub discount: f64,
}

impl ProductDto {
    pub fn from_view(view: &ProductView) -> Self {
        let p = &view.product;
        Self {
            name: p.name().to_string(),
            description: p.description.clone(),
            base_price: units(p.base_price),
            price: units(view.price),
            stock: p.stock(),
            available_stock: p.available_stock(),
            category: p.category.as_str().to_string(),
            image_path: p.image_path.clone(),
            merchant_username: p.merchant().to_string(),
            discount: view.discount,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemDto {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub image_path: String,
    pub merchant_username: String,
    pub quantity: u32,
}

impl From<&CartLine> for CartItemDto {
    fn from(line: &CartLine) -> Self {
        Self {
            name: line.product.name().to_string(),
            description: line.product.description.clone(),
            price: units(line.price),
            image_path: line.product.image_path.clone(),
            merchant_username: line.product.merchant().to_string(),
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDto {
    pub product_name: String,
    pub merchant_username: String,
    pub quantity: u32,
    pub price: f64,
    pub subtotal: f64,
}

impl From<&OrderLine> for OrderItemDto {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_name: line.key.name.clone(),
            merchant_username: line.key.merchant().to_string(),
            quantity: line.quantity,
            price: units(line.unit_price),
            subtotal: units(line.subtotal()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub order_id: String,
    pub consumer_username: String,
    pub creation_time: String,
    pub status: String,
    pub total: f64,
    pub remaining_seconds: i64,
    pub items: Vec<OrderItemDto>,
}

impl From<&OrderSummary> for OrderDto {
    fn from(summary: &OrderSummary) -> Self {
        let order = &summary.order;
        Self {
            order_id: order.id().to_string(),
            consumer_username: order.consumer().to_string(),
            creation_time: order.created_at().to_rfc3339(),
            status: order.status().as_str().to_string(),
            total: units(summary.total),
            remaining_seconds: summary.remaining_seconds,
            items: order.lines().iter().map(OrderItemDto::from).collect(),
        }
    }
}

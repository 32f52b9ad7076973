//! Remote operations as request descriptions
//!
//! Each function maps typed inputs to exactly one [`ApiRequest`]. Nothing here
//! touches the network, validates input, or retries.

use cybermart_core::{
    AddCartItemRequest, LoginRequest, NewOrder, OrderStatus, ProductInput, RegisterRequest,
    UpdateCartItemRequest, UpdateOrderStatusRequest,
};
use reqwest::Method;
use serde_json::{json, Value};

/// Method, path relative to the API base, and optional JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

// Auth

pub fn login(credentials: &LoginRequest) -> ApiRequest {
    ApiRequest::new(Method::POST, "/auth/login").with_body(json!(credentials))
}

pub fn register(user: &RegisterRequest) -> ApiRequest {
    ApiRequest::new(Method::POST, "/auth/register").with_body(json!(user))
}

pub fn profile() -> ApiRequest {
    ApiRequest::new(Method::GET, "/auth/profile")
}

// Products

pub fn list_products() -> ApiRequest {
    ApiRequest::new(Method::GET, "/products")
}

pub fn get_product(id: &str) -> ApiRequest {
    ApiRequest::new(Method::GET, format!("/products/{}", segment(id)))
}

pub fn create_product(product: &ProductInput) -> ApiRequest {
    ApiRequest::new(Method::POST, "/products").with_body(json!(product))
}

pub fn update_product(id: &str, product: &ProductInput) -> ApiRequest {
    ApiRequest::new(Method::PUT, format!("/products/{}", segment(id))).with_body(json!(product))
}

pub fn delete_product(id: &str) -> ApiRequest {
    ApiRequest::new(Method::DELETE, format!("/products/{}", segment(id)))
}

// Cart

pub fn get_cart() -> ApiRequest {
    ApiRequest::new(Method::GET, "/cart")
}

/// Add a product to the cart; quantity defaults to one
pub fn add_cart_item(product_id: &str, quantity: Option<u32>) -> ApiRequest {
    let body = AddCartItemRequest {
        product_id: product_id.to_string(),
        quantity: quantity.unwrap_or(1),
    };
    ApiRequest::new(Method::POST, "/cart/items").with_body(json!(body))
}

pub fn update_cart_item(item_id: &str, quantity: u32) -> ApiRequest {
    ApiRequest::new(Method::PUT, format!("/cart/items/{}", segment(item_id)))
        .with_body(json!(UpdateCartItemRequest { quantity }))
}

pub fn remove_cart_item(item_id: &str) -> ApiRequest {
    ApiRequest::new(Method::DELETE, format!("/cart/items/{}", segment(item_id)))
}

pub fn clear_cart() -> ApiRequest {
    ApiRequest::new(Method::DELETE, "/cart")
}

// Orders

pub fn create_order(order: &NewOrder) -> ApiRequest {
    ApiRequest::new(Method::POST, "/orders").with_body(json!(order))
}

pub fn list_my_orders() -> ApiRequest {
    ApiRequest::new(Method::GET, "/orders")
}

pub fn get_order(id: &str) -> ApiRequest {
    ApiRequest::new(Method::GET, format!("/orders/{}", segment(id)))
}

pub fn cancel_order(id: &str) -> ApiRequest {
    ApiRequest::new(Method::PUT, format!("/orders/{}/cancel", segment(id)))
}

// Admin only

pub fn list_all_orders() -> ApiRequest {
    ApiRequest::new(Method::GET, "/orders/admin/all")
}

pub fn update_order_status(id: &str, status: OrderStatus) -> ApiRequest {
    ApiRequest::new(Method::PUT, format!("/orders/admin/{}/status", segment(id)))
        .with_body(json!(UpdateOrderStatusRequest { status }))
}

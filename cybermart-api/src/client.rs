//! Typed API client

use crate::http::HttpClient;
use crate::operations;
use async_trait::async_trait;
use cybermart_core::{
    AuthResponse, Cart, ClientConfig, KeyValueStore, LoginRequest, NewOrder, Order, OrderStatus,
    Product, ProductInput, RegisterRequest, StoreResult, User,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Remote authentication operations the session manager depends on
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a token and the user record
    async fn login(&self, credentials: &LoginRequest) -> StoreResult<AuthResponse>;

    /// Create an account; answers like `login`
    async fn register(&self, user: &RegisterRequest) -> StoreResult<AuthResponse>;

    /// Fetch the user owning the persisted token
    async fn profile(&self) -> StoreResult<User>;
}

/// One async method per remote operation; errors propagate untouched
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: HttpClient,
}

impl ApiClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Build a client from configuration around an already opened store
    pub fn from_config(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> StoreResult<Self> {
        let http = HttpClient::new(&config.api, store, config.storage.token_key.clone())?;
        info!("Created API client for {}", http.base_url());
        Ok(Self::new(http))
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    // Products

    pub async fn list_products(&self) -> StoreResult<Vec<Product>> {
        self.http.send(operations::list_products()).await
    }

    pub async fn get_product(&self, id: &str) -> StoreResult<Product> {
        self.http.send(operations::get_product(id)).await
    }

    pub async fn create_product(&self, product: &ProductInput) -> StoreResult<Product> {
        self.http.send(operations::create_product(product)).await
    }

    pub async fn update_product(&self, id: &str, product: &ProductInput) -> StoreResult<Product> {
        self.http.send(operations::update_product(id, product)).await
    }

    pub async fn delete_product(&self, id: &str) -> StoreResult<Value> {
        self.http.send(operations::delete_product(id)).await
    }

    // Cart

    pub async fn get_cart(&self) -> StoreResult<Cart> {
        self.http.send(operations::get_cart()).await
    }

    pub async fn add_cart_item(&self, product_id: &str, quantity: Option<u32>) -> StoreResult<Cart> {
        self.http
            .send(operations::add_cart_item(product_id, quantity))
            .await
    }

    pub async fn update_cart_item(&self, item_id: &str, quantity: u32) -> StoreResult<Cart> {
        self.http
            .send(operations::update_cart_item(item_id, quantity))
            .await
    }

    pub async fn remove_cart_item(&self, item_id: &str) -> StoreResult<Cart> {
        self.http.send(operations::remove_cart_item(item_id)).await
    }

    pub async fn clear_cart(&self) -> StoreResult<Value> {
        self.http.send(operations::clear_cart()).await
    }

    // Orders

    pub async fn create_order(&self, order: &NewOrder) -> StoreResult<Order> {
        self.http.send(operations::create_order(order)).await
    }

    pub async fn list_my_orders(&self) -> StoreResult<Vec<Order>> {
        self.http.send(operations::list_my_orders()).await
    }

    pub async fn get_order(&self, id: &str) -> StoreResult<Order> {
        self.http.send(operations::get_order(id)).await
    }

    pub async fn cancel_order(&self, id: &str) -> StoreResult<Order> {
        self.http.send(operations::cancel_order(id)).await
    }

    /// Admin only; the server rejects other roles
    pub async fn list_all_orders(&self) -> StoreResult<Vec<Order>> {
        self.http.send(operations::list_all_orders()).await
    }

    /// Admin only; the server rejects other roles
    pub async fn update_order_status(&self, id: &str, status: OrderStatus) -> StoreResult<Order> {
        self.http
            .send(operations::update_order_status(id, status))
            .await
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &LoginRequest) -> StoreResult<AuthResponse> {
        self.http.send(operations::login(credentials)).await
    }

    async fn register(&self, user: &RegisterRequest) -> StoreResult<AuthResponse> {
        self.http.send(operations::register(user)).await
    }

    async fn profile(&self) -> StoreResult<User> {
        self.http.send(operations::profile()).await
    }
}

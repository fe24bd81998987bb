#![allow(dead_code)]

use operations_service::config::OperationsConfig;
use operations_service::services::{CalDavCalendar, MemoryStore, MockNotifier, Stores};
use operations_service::Application;
use reqwest::{Client, Method, RequestBuilder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ADMIN_ID: &str = "admin-1";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<MockNotifier>,
    pub client: Client,
    shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with the in-memory store and a recording notifier. `configure`
    /// may adjust the defaults before the application is built.
    pub async fn spawn_with(configure: impl FnOnce(&mut OperationsConfig)) -> Self {
        let mut config = OperationsConfig::default();
        config.common.port = 0;
        config.service_name = "operations-service-test".to_string();
        config.calendar.timeout_ms = 500;
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let calendar = CalDavCalendar::new(config.calendar.timeout(), config.business.utc_offset())
            .expect("Failed to build calendar client");

        let app = Application::build_with(
            config,
            Stores::from_store(store.clone()),
            Arc::new(calendar),
            notifier.clone(),
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server by polling the health endpoint
        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            notifier,
            client,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn as_admin(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-User-ID", ADMIN_ID)
            .header("X-User-Role", "admin")
    }

    pub fn as_client(&self, client_id: &str, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-User-ID", client_id)
            .header("X-User-Role", "client")
    }

    /// Active subscription with a single recurring line.
    pub async fn subscribe(&self, client_id: &str, billing_day: i32, monthly_fee: &str) {
        let response = self
            .as_admin(Method::PUT, &format!("/clients/{}/subscription", client_id))
            .json(&serde_json::json!({
                "billing_email": format!("{}@example.com", client_id),
                "billing_day": billing_day,
                "recurring_items": [{
                    "description": "Monthly maintenance",
                    "quantity": "1",
                    "unit_price": monthly_fee
                }]
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert!(
            response.status().is_success(),
            "subscription upsert failed: {}",
            response.status()
        );
    }

    pub async fn log_service(
        &self,
        client_id: &str,
        description: &str,
        amount: &str,
        service_date: &str,
    ) -> serde_json::Value {
        let response = self
            .as_admin(Method::POST, &format!("/clients/{}/services", client_id))
            .json(&serde_json::json!({
                "description": description,
                "quantity": "1",
                "unit_price": amount,
                "service_date": service_date
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Failed to parse JSON")
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

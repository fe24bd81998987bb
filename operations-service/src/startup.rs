//! Application wiring: stores, collaborators, router and lifecycle.

use crate::config::OperationsConfig;
use crate::handlers;
use crate::models::BusinessHours;
use crate::services::{
    AvailabilityCalculator, AvailabilitySettings, BookingService, CalDavCalendar,
    CalendarSessions, CalendarSource, InvoiceConsolidator, InvoiceNotifier, MemoryStore,
    MongoStore, SmtpNotifier, Stores,
};
use crate::workers::BillingScheduler;
use axum::body::Body;
use axum::middleware::from_fn;
use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: OperationsConfig,
    pub stores: Stores,
    pub availability: Arc<AvailabilityCalculator>,
    pub booking: Arc<BookingService>,
    pub invoicing: Arc<InvoiceConsolidator>,
    pub calendar_sessions: CalendarSessions,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: BillingScheduler,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Build against MongoDB when configured, otherwise the in-memory store.
    pub async fn build(config: OperationsConfig) -> Result<Self, AppError> {
        let stores = match &config.mongodb {
            Some(mongo) => {
                let mut client_options = ClientOptions::parse(&mongo.uri).await.map_err(|e| {
                    tracing::error!("Failed to parse MongoDB connection string: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
                client_options.app_name = Some(config.service_name.clone());

                let client = Client::with_options(client_options).map_err(|e| {
                    tracing::error!("Failed to create MongoDB client: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
                let store = MongoStore::new(&client.database(&mongo.database));
                store.init_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    AppError::from(e)
                })?;
                tracing::info!(database = %mongo.database, "Using MongoDB store");
                Stores::from_store(Arc::new(store))
            }
            None => {
                tracing::warn!("MONGODB_URI not set, data is kept in memory only");
                Stores::from_store(Arc::new(MemoryStore::new()))
            }
        };

        let calendar = CalDavCalendar::new(config.calendar.timeout(), config.business.utc_offset())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Calendar client: {}", e)))?;

        let notifier = SmtpNotifier::new(config.smtp.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("SMTP notifier: {}", e)))?;
        if notifier.is_enabled() {
            tracing::info!(host = %config.smtp.host, "Invoice email delivery enabled");
        } else {
            tracing::warn!("SMTP disabled - invoice emails will be skipped");
        }

        Self::build_with(config, stores, Arc::new(calendar), Arc::new(notifier)).await
    }

    /// Build with explicit collaborators.
    pub async fn build_with(
        config: OperationsConfig,
        stores: Stores,
        calendar: Arc<dyn CalendarSource>,
        notifier: Arc<dyn InvoiceNotifier>,
    ) -> Result<Self, AppError> {
        let default_hours = BusinessHours::from_table(config.business.default_hours.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Default business hours: {}", e)))?;

        let availability = Arc::new(AvailabilityCalculator::new(
            stores.scheduling.clone(),
            calendar,
            AvailabilitySettings {
                slot_minutes: config.business.slot_minutes,
                offset: config.business.utc_offset(),
                calendar_timeout: config.calendar.timeout(),
                default_hours,
            },
        ));
        let booking = Arc::new(BookingService::new(
            stores.scheduling.clone(),
            availability.clone(),
        ));
        let invoicing = Arc::new(InvoiceConsolidator::new(
            stores.billing.clone(),
            notifier,
            config.invoicing.due_days,
        ));

        let shutdown_token = CancellationToken::new();
        let scheduler = BillingScheduler::new(
            config.scheduler.clone(),
            invoicing.clone(),
            availability.clone(),
            shutdown_token.clone(),
        );

        let state = AppState {
            config: config.clone(),
            stores,
            availability,
            booking,
            invoicing,
            calendar_sessions: CalendarSessions::new(),
        };

        let router = router(state);

        // Port 0 binds a random port for tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(service = %config.service_name, "Listening on {}", port);

        Ok(Self {
            port,
            listener,
            router,
            scheduler,
            shutdown_token,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cancelling this token stops the server and the billing scheduler.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let scheduler = tokio::spawn(self.scheduler.start());

        let token = self.shutdown_token.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        self.shutdown_token.cancel();
        if let Err(e) = scheduler.await {
            tracing::error!(error = %e, "Billing scheduler task failed");
        }
        result
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Scheduling
        .route(
            "/availability",
            get(handlers::availability::get_availability),
        )
        .route(
            "/calendar/sessions",
            post(handlers::calendar::create_session),
        )
        .route(
            "/calendar/sessions/:id",
            delete(handlers::calendar::end_session),
        )
        .route(
            "/meetings",
            get(handlers::meetings::list_meetings).post(handlers::meetings::book_meeting),
        )
        .route(
            "/meetings/:id/cancel",
            post(handlers::meetings::cancel_meeting),
        )
        .route(
            "/settings/business-hours",
            get(handlers::settings::get_business_hours)
                .put(handlers::settings::put_business_hours),
        )
        .route(
            "/service-requests",
            get(handlers::service_requests::list_service_requests)
                .post(handlers::service_requests::create_service_request),
        )
        .route(
            "/service-requests/:id",
            patch(handlers::service_requests::update_service_request_status),
        )
        // Billing
        .route(
            "/clients/:id/subscription",
            get(handlers::billing::get_subscription).put(handlers::billing::upsert_subscription),
        )
        .route(
            "/clients/:id/services",
            get(handlers::billing::list_services).post(handlers::billing::log_service),
        )
        .route(
            "/clients/:id/invoices",
            get(handlers::billing::list_invoices).post(handlers::billing::generate_invoice),
        )
        .route(
            "/clients/:id/invoices/preview",
            get(handlers::billing::preview_invoice),
        )
        .route(
            "/invoices/run-due",
            post(handlers::billing::run_due_invoices),
        )
        .route("/invoices/:id", get(handlers::billing::get_invoice))
        .route(
            "/invoices/:id/settle-services",
            post(handlers::billing::settle_services),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .with_state(state)
}

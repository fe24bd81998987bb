use crate::config::SchedulerConfig;
use crate::services::{AvailabilityCalculator, InvoiceConsolidator};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically bills the subscriptions due today.
pub struct BillingScheduler {
    config: SchedulerConfig,
    invoicing: Arc<InvoiceConsolidator>,
    availability: Arc<AvailabilityCalculator>,
    shutdown_token: CancellationToken,
}

impl BillingScheduler {
    pub fn new(
        config: SchedulerConfig,
        invoicing: Arc<InvoiceConsolidator>,
        availability: Arc<AvailabilityCalculator>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            invoicing,
            availability,
            shutdown_token,
        }
    }

    pub async fn start(self) {
        if !self.config.enabled {
            tracing::info!("Billing scheduler disabled by configuration");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            "Starting billing scheduler"
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Billing scheduler stopping");
                    break;
                }
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }

    async fn run_once(&self) {
        // "Today" is the business's local date, not the server's.
        let today = self.availability.today();
        match self.invoicing.generate_due_invoices(today).await {
            Ok(run) => {
                for message in &run.error_messages {
                    tracing::warn!(run_date = %today, error = %message, "Scheduled invoice failed");
                }
                tracing::info!(
                    run_date = %today,
                    generated = run.generated_count,
                    failed = run.error_messages.len(),
                    "Scheduled billing run complete"
                );
            }
            Err(e) => {
                tracing::error!(run_date = %today, error = %e, "Scheduled billing run failed");
            }
        }
    }
}

//! Invoice email delivery.

use crate::config::SmtpConfig;
use crate::models::Invoice;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::fmt::Write as _;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifier not enabled")]
    NotEnabled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

/// Everything the client needs to know about a freshly generated invoice.
#[derive(Debug, Clone)]
pub struct InvoiceEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

impl InvoiceEmail {
    pub fn for_invoice(to: &str, invoice: &Invoice) -> Self {
        let mut body = format!(
            "Your invoice for {} is ready.\n\nInvoice: {}\n\n",
            invoice.billing_month, invoice.id
        );
        for line in &invoice.line_items {
            let _ = writeln!(
                body,
                "  {} x{} @ {} = {}",
                line.description, line.quantity, line.unit_price, line.amount
            );
        }
        let _ = write!(
            body,
            "\nSubtotal: {}\nTax: {}\nTotal: {}\nDue: {}\n",
            invoice.subtotal,
            invoice.tax,
            invoice.total,
            invoice.due_date.format("%Y-%m-%d")
        );

        Self {
            to: to.to_string(),
            subject: format!("Invoice for {}", invoice.billing_month),
            body_text: body,
        }
    }
}

#[async_trait]
pub trait InvoiceNotifier: Send + Sync {
    async fn send_invoice_email(&self, email: &InvoiceEmail) -> Result<(), NotifyError>;

    fn is_enabled(&self) -> bool;
}

pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }
}

#[async_trait]
impl InvoiceNotifier for SmtpNotifier {
    async fn send_invoice_email(&self, email: &InvoiceEmail) -> Result<(), NotifyError> {
        let transport = self.transport.as_ref().ok_or(NotifyError::NotEnabled)?;

        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| NotifyError::Configuration(format!("Invalid from address: {}", e)))?;
        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| NotifyError::InvalidRecipient(format!("{}: {}", email.to, e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body_text.clone())
            .map_err(|e| NotifyError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(to = %email.to, subject = %email.subject, "Invoice email sent");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

/// Records emails instead of sending them.
#[derive(Default)]
pub struct MockNotifier {
    fail: bool,
    sent: Mutex<Vec<InvoiceEmail>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<InvoiceEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn send_count(&self) -> usize {
        self.sent().len()
    }
}

#[async_trait]
impl InvoiceNotifier for MockNotifier {
    async fn send_invoice_email(&self, email: &InvoiceEmail) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::SendFailed("mock failure".to_string()));
        }
        tracing::info!(to = %email.to, subject = %email.subject, "[MOCK] Invoice email would be sent");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

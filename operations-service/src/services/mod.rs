pub mod availability;
pub mod booking;
pub mod calendar;
pub mod invoicing;
pub mod metrics;
pub mod notifier;
pub mod store;

pub use availability::{AvailabilityCalculator, AvailabilitySettings, CalendarOutcome};
pub use booking::BookingService;
pub use calendar::{
    CalDavCalendar, CalendarError, CalendarSession, CalendarSessions, CalendarSource,
    CALENDAR_SESSION_HEADER,
};
pub use invoicing::{
    DueInvoiceRun, GeneratedInvoice, InvoiceConsolidator, InvoiceError, InvoicePreview,
    NotificationOutcome, Settlement,
};
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{InvoiceEmail, InvoiceNotifier, MockNotifier, NotifyError, SmtpNotifier};
pub use store::{BillingStore, MemoryStore, MongoStore, SchedulingStore, StoreError, Stores};

//! Domain models for operations-service.

mod availability;
mod billing_month;
mod business_hours;
mod invoice;
mod line_item;
mod meeting;
mod pending_service;
mod service_request;
mod subscription;

pub use availability::{DayAvailability, ExternalBusyInterval, TimeSlot};
pub use billing_month::BillingMonth;
pub use business_hours::{
    parse_hours_range, parse_time_of_day, weekday_key, BusinessHours, BusinessHoursSettings,
    BusinessHoursTable, OpeningWindow, WEEKDAY_KEYS,
};
pub use invoice::{Invoice, InvoiceStatus};
pub use line_item::{InvoiceLineItem, LineItemSource, ServiceLineItem};
pub use meeting::{Meeting, MeetingStatus};
pub use pending_service::PendingService;
pub use service_request::{ServiceRequest, ServiceRequestStatus};
pub use subscription::Subscription;

mod billing_scheduler;

pub use billing_scheduler::BillingScheduler;

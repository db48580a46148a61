//! Background jobs

pub mod licence;
pub mod mailer;

pub use licence::{LicenceExpiryJob, ScanReport};
pub use mailer::{EmailMessage, LogMailer, Mailer};

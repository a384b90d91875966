//! Leadflow: Lead lifecycle bounded context.
//!
//! Responsible for lead intake, CRM hand-off, payment registration and
//! ad-platform conversion reporting. Lead state is derived entirely from the
//! event log; side effects run as tasks on the durable queue.

pub mod application;
pub mod domain;
pub mod integrations;

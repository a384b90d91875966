//! Commands for the lead lifecycle context.

use uuid::Uuid;

use super::events::{FormData, Payment};
use crate::integrations::CrmConfig;

/// Command to record a lead submitted by a landing page.
#[derive(Debug, Clone)]
pub struct CreateLead {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Submitted form fields.
    pub form_data: FormData,
    /// Landing page the lead came from.
    pub landing_id: String,
    /// Explicit campaign attribution; falls back to the form's
    /// `campaign_id`, then its `utm_campaign`.
    pub campaign_id: Option<String>,
    /// CRM routing for this landing/campaign, if any.
    pub crm_config: Option<CrmConfig>,
}

impl CreateLead {
    /// Name of the command in logs.
    pub const COMMAND_TYPE: &'static str = "lead.create";
}

/// Command to register a payment reported for a lead.
#[derive(Debug, Clone)]
pub struct RegisterPayment {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The paying lead.
    pub lead_id: String,
    /// The payment.
    pub payment: Payment,
    /// Where the notice came from.
    pub source: Option<String>,
}

impl RegisterPayment {
    /// Name of the command in logs.
    pub const COMMAND_TYPE: &'static str = "lead.register_payment";
}

//! Contracts for the external systems leads are delivered to.
//!
//! Task handlers depend on these traits; the worker binary provides HTTP
//! implementations and tests provide scripted ones.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::handler::HandlerError;
use serde::{Deserialize, Serialize};

use crate::domain::events::FormData;

/// Conversion type reported when a lead pays.
pub const PAYMENT_CONVERSION_TYPE: &str = "PAYMENT";

/// What a destination answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Status code returned by the destination.
    pub status: u16,
    /// Response body; JSON when the destination sent JSON, a string otherwise.
    pub body: serde_json::Value,
}

impl DeliveryOutcome {
    /// Whether the destination accepted the delivery (2xx).
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts a non-2xx outcome into `HandlerError::Rejected`.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Rejected` unless the status is 2xx.
    pub fn into_accepted(self) -> Result<Self, HandlerError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HandlerError::Rejected {
                status: self.status,
                body: self.body.to_string(),
            })
        }
    }

    /// JSON form recorded on the lead's events.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "status": self.status, "body": self.body })
    }
}

/// Where and how a lead is delivered to a CRM. Carried inside the
/// `send_to_crm` task payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Identity recorded on the lead once delivered.
    #[serde(default)]
    pub crm_id: Option<String>,
    /// Delivery URL. Leads are only queued for CRMs with an endpoint.
    #[serde(default)]
    pub api_endpoint: String,
    /// `form field → CRM field` renames; unmapped fields are not sent.
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
    /// Added to the body as `api_key` when present.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl CrmConfig {
    /// Whether a delivery endpoint is configured.
    #[must_use]
    pub fn has_endpoint(&self) -> bool {
        !self.api_endpoint.trim().is_empty()
    }

    /// Builds the request body: each mapped form field under its CRM name,
    /// plus the API key.
    #[must_use]
    pub fn map_fields(&self, form_data: &FormData) -> FormData {
        let mut mapped: FormData = self
            .field_mapping
            .iter()
            .filter_map(|(source, target)| {
                form_data
                    .get(source)
                    .map(|value| (target.clone(), value.clone()))
            })
            .collect();
        if let Some(api_key) = &self.api_key {
            mapped.insert("api_key".to_owned(), serde_json::Value::String(api_key.clone()));
        }
        mapped
    }
}

/// An offline conversion for the ad platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    /// Campaign the lead is attributed to.
    pub campaign_id: String,
    /// Lead the conversion belongs to.
    pub lead_id: String,
    /// Conversion type, e.g. [`PAYMENT_CONVERSION_TYPE`].
    pub conversion_type: String,
    /// Conversion value.
    pub value: f64,
    /// When the conversion happened.
    pub occurred_at: DateTime<Utc>,
}

/// Delivers lead data to a CRM.
#[async_trait]
pub trait CrmSender: Send + Sync {
    /// Sends the lead's form data to the CRM described by `config`.
    ///
    /// Transport failures are errors; any HTTP answer is an outcome.
    async fn send_lead(
        &self,
        form_data: &FormData,
        config: &CrmConfig,
    ) -> Result<DeliveryOutcome, HandlerError>;
}

/// Reports offline conversions to the ad platform.
#[async_trait]
pub trait ConversionReporter: Send + Sync {
    /// Reports one conversion.
    async fn report(&self, conversion: &Conversion) -> Result<DeliveryOutcome, HandlerError>;
}

//! Domain events for the lead lifecycle context.

use std::fmt;

use leadflow_core::event::{DomainEvent, EventMetadata};
use serde::{Deserialize, Serialize};

/// Flat key/value form data submitted by a landing page.
pub type FormData = serde_json::Map<String, serde_json::Value>;

/// A payment recorded against a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Paid amount.
    pub amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Payment identifier assigned by the payment source.
    pub payment_id: Option<String>,
}

/// Emitted when a landing page submits a new lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadCreated {
    /// The lead identifier.
    pub lead_id: String,
    /// Submitted form fields.
    pub form_data: FormData,
    /// Landing page the lead came from.
    pub landing_id: String,
    /// Advertising campaign the lead is attributed to.
    pub campaign_id: Option<String>,
}

/// Emitted when a CRM accepted the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSentToCrm {
    /// The lead identifier.
    pub lead_id: String,
    /// Identity of the CRM the lead was delivered to.
    pub crm_id: Option<String>,
    /// Status and body returned by the CRM.
    pub crm_response: serde_json::Value,
}

/// Emitted when a payment for the lead was reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    /// The lead identifier.
    pub lead_id: String,
    /// The recorded payment.
    pub payment: Payment,
    /// Where the payment notice came from (e.g. the CRM id of a webhook).
    pub source: Option<String>,
}

/// Emitted when the ad platform accepted an offline conversion for the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdConversionReported {
    /// The lead identifier.
    pub lead_id: String,
    /// Campaign the conversion was reported for.
    pub campaign_id: String,
    /// Reported conversion value.
    pub amount: f64,
    /// Status and body returned by the ad platform.
    pub response: serde_json::Value,
}

/// Event type identifier for [`LeadCreated`].
pub const LEAD_CREATED_EVENT_TYPE: &str = "lead.created";

/// Event type identifier for [`LeadSentToCrm`].
pub const LEAD_SENT_TO_CRM_EVENT_TYPE: &str = "lead.sent_to_crm";

/// Event type identifier for [`PaymentRegistered`].
pub const PAYMENT_REGISTERED_EVENT_TYPE: &str = "lead.payment_registered";

/// Event type identifier for [`AdConversionReported`].
pub const AD_CONVERSION_REPORTED_EVENT_TYPE: &str = "lead.ad_conversion_reported";

/// The closed set of event types this context understands. Stored events
/// with any other tag are skipped on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeadEventType {
    /// [`LEAD_CREATED_EVENT_TYPE`]
    LeadCreated,
    /// [`LEAD_SENT_TO_CRM_EVENT_TYPE`]
    LeadSentToCrm,
    /// [`PAYMENT_REGISTERED_EVENT_TYPE`]
    PaymentRegistered,
    /// [`AD_CONVERSION_REPORTED_EVENT_TYPE`]
    AdConversionReported,
}

impl LeadEventType {
    /// Returns the stored tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeadCreated => LEAD_CREATED_EVENT_TYPE,
            Self::LeadSentToCrm => LEAD_SENT_TO_CRM_EVENT_TYPE,
            Self::PaymentRegistered => PAYMENT_REGISTERED_EVENT_TYPE,
            Self::AdConversionReported => AD_CONVERSION_REPORTED_EVENT_TYPE,
        }
    }

    /// Resolves a stored tag, or `None` for a type this context does not know.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            LEAD_CREATED_EVENT_TYPE => Some(Self::LeadCreated),
            LEAD_SENT_TO_CRM_EVENT_TYPE => Some(Self::LeadSentToCrm),
            PAYMENT_REGISTERED_EVENT_TYPE => Some(Self::PaymentRegistered),
            AD_CONVERSION_REPORTED_EVENT_TYPE => Some(Self::AdConversionReported),
            _ => None,
        }
    }
}

impl fmt::Display for LeadEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload variants for the lead lifecycle context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeadEventKind {
    /// A lead has been created.
    LeadCreated(LeadCreated),
    /// A lead has been delivered to a CRM.
    LeadSentToCrm(LeadSentToCrm),
    /// A payment has been registered for a lead.
    PaymentRegistered(PaymentRegistered),
    /// A conversion has been reported to the ad platform.
    AdConversionReported(AdConversionReported),
}

impl LeadEventKind {
    /// Returns the type tag of this payload.
    #[must_use]
    pub fn event_type(&self) -> LeadEventType {
        match self {
            Self::LeadCreated(_) => LeadEventType::LeadCreated,
            Self::LeadSentToCrm(_) => LeadEventType::LeadSentToCrm,
            Self::PaymentRegistered(_) => LeadEventType::PaymentRegistered,
            Self::AdConversionReported(_) => LeadEventType::AdConversionReported,
        }
    }
}

/// Domain event envelope for the lead lifecycle context.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: LeadEventKind,
}

impl DomainEvent for LeadEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type().as_str()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(&self.kind).expect("LeadEventKind serialization is infallible")
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags_resolve_back() {
        for event_type in [
            LeadEventType::LeadCreated,
            LeadEventType::LeadSentToCrm,
            LeadEventType::PaymentRegistered,
            LeadEventType::AdConversionReported,
        ] {
            assert_eq!(LeadEventType::from_tag(event_type.as_str()), Some(event_type));
        }
        assert_eq!(LeadEventType::from_tag("lead.archived"), None);
    }

    #[test]
    fn test_payload_is_tagged_by_variant() {
        // Arrange
        let kind = LeadEventKind::PaymentRegistered(PaymentRegistered {
            lead_id: "lead_1".to_owned(),
            payment: Payment {
                amount: 1500.0,
                currency: "RUB".to_owned(),
                payment_id: Some("pay_1".to_owned()),
            },
            source: None,
        });

        // Act
        let value = serde_json::to_value(&kind).unwrap();
        let decoded: LeadEventKind = serde_json::from_value(value.clone()).unwrap();

        // Assert
        assert_eq!(value["PaymentRegistered"]["payment"]["amount"], 1500.0);
        assert_eq!(decoded, kind);
    }
}

//! Aggregate roots for the lead lifecycle context.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use leadflow_core::aggregate::AggregateRoot;
use leadflow_core::clock::Clock;
use leadflow_core::error::DomainError;
use leadflow_core::event::EventMetadata;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    AdConversionReported, FormData, LeadCreated, LeadEvent, LeadEventKind, LeadSentToCrm,
    Payment, PaymentRegistered,
};

/// Allocates a new lead identity: `lead_` followed by 32 hex digits.
#[must_use]
pub fn new_lead_id() -> String {
    format!("lead_{}", Uuid::new_v4().simple())
}

/// Lifecycle status of a lead. Ordered: a lead never moves to an earlier
/// status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Created, not yet accepted by a CRM.
    #[default]
    New,
    /// Accepted by a CRM.
    SentToCrm,
    /// A payment was registered.
    Paid,
}

impl LeadStatus {
    /// Returns the stable tag for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::SentToCrm => "sent_to_crm",
            Self::Paid => "paid",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "sent_to_crm" => Ok(Self::SentToCrm),
            "paid" => Ok(Self::Paid),
            other => Err(DomainError::Validation(format!("unknown lead status: {other}"))),
        }
    }
}

/// The aggregate root for a lead.
#[derive(Debug, Clone)]
pub struct Lead {
    /// Aggregate identifier.
    pub id: String,
    /// Current version (events replayed or recorded).
    pub(crate) version: i64,
    form_data: FormData,
    landing_id: String,
    status: LeadStatus,
    campaign_id: Option<String>,
    crm_id: Option<String>,
    payment: Option<Payment>,
    ad_conversions: u32,
    created_at: Option<DateTime<Utc>>,
    /// Uncommitted events pending persistence.
    uncommitted_events: Vec<LeadEvent>,
}

impl Lead {
    /// Creates an empty lead, ready to replay its history.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            form_data: FormData::new(),
            landing_id: String::new(),
            status: LeadStatus::New,
            campaign_id: None,
            crm_id: None,
            payment: None,
            ad_conversions: 0,
            created_at: None,
            uncommitted_events: Vec::new(),
        }
    }

    /// Creates a lead under a fresh identity, producing a `LeadCreated`
    /// event. The event is also held as uncommitted.
    pub fn create(
        form_data: FormData,
        landing_id: impl Into<String>,
        campaign_id: Option<String>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> (Self, LeadEvent) {
        let mut lead = Self::new(new_lead_id());
        let kind = LeadEventKind::LeadCreated(LeadCreated {
            lead_id: lead.id.clone(),
            form_data,
            landing_id: landing_id.into(),
            campaign_id,
        });
        let event = lead.record(kind, correlation_id, clock);
        (lead, event)
    }

    /// Records delivery to a CRM, producing a `LeadSentToCrm` event.
    pub fn send_to_crm(
        &mut self,
        crm_id: Option<String>,
        crm_response: serde_json::Value,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) {
        let kind = LeadEventKind::LeadSentToCrm(LeadSentToCrm {
            lead_id: self.id.clone(),
            crm_id,
            crm_response,
        });
        self.record(kind, correlation_id, clock);
    }

    /// Registers a payment, producing a `PaymentRegistered` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the amount is negative or not a
    /// finite number.
    pub fn register_payment(
        &mut self,
        payment: Payment,
        source: Option<String>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if !payment.amount.is_finite() || payment.amount < 0.0 {
            return Err(DomainError::Validation(format!(
                "payment amount must be a non-negative number, got {} for lead {}",
                payment.amount, self.id
            )));
        }
        let kind = LeadEventKind::PaymentRegistered(PaymentRegistered {
            lead_id: self.id.clone(),
            payment,
            source,
        });
        self.record(kind, correlation_id, clock);
        Ok(())
    }

    /// Records an accepted ad-platform conversion, producing an
    /// `AdConversionReported` event.
    pub fn record_ad_conversion(
        &mut self,
        campaign_id: String,
        amount: f64,
        response: serde_json::Value,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) {
        let kind = LeadEventKind::AdConversionReported(AdConversionReported {
            lead_id: self.id.clone(),
            campaign_id,
            amount,
            response,
        });
        self.record(kind, correlation_id, clock);
    }

    /// Submitted form fields.
    #[must_use]
    pub fn form_data(&self) -> &FormData {
        &self.form_data
    }

    /// Landing page the lead came from.
    #[must_use]
    pub fn landing_id(&self) -> &str {
        &self.landing_id
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> LeadStatus {
        self.status
    }

    /// Campaign the lead is attributed to.
    #[must_use]
    pub fn campaign_id(&self) -> Option<&str> {
        self.campaign_id.as_deref()
    }

    /// CRM that accepted the lead.
    #[must_use]
    pub fn crm_id(&self) -> Option<&str> {
        self.crm_id.as_deref()
    }

    /// The latest registered payment.
    #[must_use]
    pub fn payment(&self) -> Option<&Payment> {
        self.payment.as_ref()
    }

    /// Number of conversions accepted by the ad platform.
    #[must_use]
    pub fn ad_conversions(&self) -> u32 {
        self.ad_conversions
    }

    /// When the lead was created.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Counts a stored event of a type this context does not understand.
    pub(crate) fn skip_unknown_event(&mut self) {
        self.version += 1;
    }

    fn record(
        &mut self,
        kind: LeadEventKind,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> LeadEvent {
        // TODO: event_id uses Uuid::new_v4(); replaying a command twice
        // yields different event ids. Thread an id generator through once
        // commands carry idempotency keys.
        let event = LeadEvent {
            metadata: EventMetadata::for_command(
                kind.event_type().as_str(),
                &self.id,
                self.version + 1,
                correlation_id,
                clock.now(),
            ),
            kind,
        };
        self.apply(&event);
        self.uncommitted_events.push(event.clone());
        event
    }
}

impl AggregateRoot for Lead {
    type Event = LeadEvent;

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            LeadEventKind::LeadCreated(payload) => {
                self.form_data = payload.form_data.clone();
                self.landing_id = payload.landing_id.clone();
                self.campaign_id = payload.campaign_id.clone();
                self.status = self.status.max(LeadStatus::New);
                self.created_at = Some(event.metadata.occurred_at);
            }
            LeadEventKind::LeadSentToCrm(payload) => {
                if payload.crm_id.is_some() {
                    self.crm_id = payload.crm_id.clone();
                }
                self.status = self.status.max(LeadStatus::SentToCrm);
            }
            LeadEventKind::PaymentRegistered(payload) => {
                self.payment = Some(payload.payment.clone());
                self.status = self.status.max(LeadStatus::Paid);
            }
            LeadEventKind::AdConversionReported(_) => {
                self.ad_conversions += 1;
            }
        }
        self.version += 1;
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn take_uncommitted_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.uncommitted_events)
    }
}

//! Task handlers for the lead lifecycle context.
//!
//! Each handler decodes its task payload, calls one external system and,
//! when that system accepts, records the outcome as a lead event. A rejected
//! or failed delivery leaves the log untouched, so a retry starts over.

use std::sync::Arc;

use async_trait::async_trait;
use leadflow_core::aggregate::AggregateRoot;
use leadflow_core::clock::Clock;
use leadflow_core::handler::{HandlerError, TaskHandler};
use leadflow_core::task::Task;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use crate::application::command_handlers::load_lead;
use crate::application::event_log::EventLog;
use crate::integrations::{
    Conversion, ConversionReporter, CrmConfig, CrmSender, PAYMENT_CONVERSION_TYPE,
};

fn decode_payload<T: DeserializeOwned>(task: &Task) -> Result<T, HandlerError> {
    serde_json::from_value(task.payload.clone())
        .map_err(|e| HandlerError::Failed(format!("malformed {} payload: {e}", task.kind)))
}

#[derive(Debug, Deserialize)]
struct SendToCrmPayload {
    lead_id: String,
    crm_config: CrmConfig,
}

#[derive(Debug, Deserialize)]
struct AdConversionPayload {
    lead_id: String,
    #[serde(default)]
    campaign_id: Option<String>,
    #[serde(default)]
    payment_amount: f64,
}

/// Handles `send_to_crm`: delivers the lead's form data and records
/// `lead.sent_to_crm`.
pub struct SendToCrmHandler {
    log: Arc<EventLog>,
    sender: Arc<dyn CrmSender>,
    clock: Arc<dyn Clock>,
}

impl SendToCrmHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(log: Arc<EventLog>, sender: Arc<dyn CrmSender>, clock: Arc<dyn Clock>) -> Self {
        Self { log, sender, clock }
    }
}

#[async_trait]
impl TaskHandler for SendToCrmHandler {
    #[instrument(skip_all, fields(task_id = %task.id, attempt = task.attempts))]
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError> {
        let payload: SendToCrmPayload = decode_payload(task)?;
        let mut lead = load_lead(&payload.lead_id, &self.log).await?;

        let outcome = self
            .sender
            .send_lead(lead.form_data(), &payload.crm_config)
            .await?
            .into_accepted()?;

        lead.send_to_crm(
            payload.crm_config.crm_id.clone(),
            outcome.to_json(),
            task.id,
            self.clock.as_ref(),
        );
        let stored_events = lead.take_stored_events();
        self.log.append(&lead.id, &stored_events).await?;

        info!(lead_id = %lead.id, status = outcome.status, "lead delivered to CRM");
        Ok(serde_json::json!({
            "lead_id": lead.id,
            "crm_id": payload.crm_config.crm_id,
            "status": outcome.status,
        }))
    }
}

/// Handles `send_ad_conversion`: reports the payment as an offline
/// conversion and records `lead.ad_conversion_reported`.
pub struct AdConversionHandler {
    log: Arc<EventLog>,
    reporter: Arc<dyn ConversionReporter>,
    clock: Arc<dyn Clock>,
}

impl AdConversionHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(
        log: Arc<EventLog>,
        reporter: Arc<dyn ConversionReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log,
            reporter,
            clock,
        }
    }
}

#[async_trait]
impl TaskHandler for AdConversionHandler {
    #[instrument(skip_all, fields(task_id = %task.id, attempt = task.attempts))]
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError> {
        let payload: AdConversionPayload = decode_payload(task)?;
        let mut lead = load_lead(&payload.lead_id, &self.log).await?;

        let campaign_id = lead
            .campaign_id()
            .map(str::to_owned)
            .or(payload.campaign_id)
            .ok_or_else(|| {
                HandlerError::Failed(format!("lead {} has no campaign", payload.lead_id))
            })?;

        let conversion = Conversion {
            campaign_id: campaign_id.clone(),
            lead_id: lead.id.clone(),
            conversion_type: PAYMENT_CONVERSION_TYPE.to_owned(),
            value: payload.payment_amount,
            occurred_at: self.clock.now(),
        };
        let outcome = self.reporter.report(&conversion).await?.into_accepted()?;

        lead.record_ad_conversion(
            campaign_id.clone(),
            payload.payment_amount,
            outcome.to_json(),
            task.id,
            self.clock.as_ref(),
        );
        let stored_events = lead.take_stored_events();
        self.log.append(&lead.id, &stored_events).await?;

        info!(lead_id = %lead.id, %campaign_id, "ad conversion reported");
        Ok(serde_json::json!({
            "lead_id": lead.id,
            "campaign_id": campaign_id,
            "amount": payload.payment_amount,
        }))
    }
}

//! Command handlers for the lead lifecycle context.
//!
//! This module contains application-level command handler functions that
//! orchestrate domain logic: load aggregate, execute command, persist events,
//! enqueue follow-up work.

use std::time::Duration;

use leadflow_core::aggregate::AggregateRoot;
use leadflow_core::clock::Clock;
use leadflow_core::error::DomainError;
use leadflow_core::event::EventMetadata;
use leadflow_core::repository::StoredEvent;
use leadflow_core::task::{Task, TaskKind};
use tracing::{debug, info, instrument};

use crate::application::event_log::EventLog;
use crate::domain::aggregates::Lead;
use crate::domain::commands::{CreateLead, RegisterPayment};
use crate::domain::events::{FormData, LeadEvent, LeadEventKind, LeadEventType};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct LeadCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: String,
    /// Campaign the lead is attributed to.
    pub campaign_id: Option<String>,
    /// The stored events produced and persisted.
    pub stored_events: Vec<StoredEvent>,
    /// Tasks enqueued as a consequence of the command.
    pub enqueued_tasks: Vec<Task>,
}

/// Decodes a stored event into a typed lead event. Returns `Ok(None)` for
/// event types this context does not know.
///
/// # Errors
///
/// Returns `DomainError::Storage` if the payload of a known type is
/// malformed.
pub(crate) fn decode_event(stored: &StoredEvent) -> Result<Option<LeadEvent>, DomainError> {
    if LeadEventType::from_tag(&stored.event_type).is_none() {
        return Ok(None);
    }
    let kind: LeadEventKind = serde_json::from_value(stored.payload.clone()).map_err(|e| {
        DomainError::Storage(format!(
            "event {} ({}) deserialization failed: {e}",
            stored.event_id, stored.event_type
        ))
    })?;
    Ok(Some(LeadEvent {
        metadata: EventMetadata {
            event_id: stored.event_id,
            event_type: stored.event_type.clone(),
            aggregate_id: stored.aggregate_id.clone(),
            sequence_number: stored.sequence_number,
            correlation_id: stored.correlation_id,
            causation_id: stored.causation_id,
            occurred_at: stored.occurred_at,
        },
        kind,
    }))
}

/// Reconstitutes a `Lead` from stored events. Unknown event types are
/// skipped but still counted in the version.
///
/// # Errors
///
/// Returns `DomainError::Storage` if event deserialization fails.
pub(crate) fn reconstitute(
    lead_id: &str,
    existing_events: &[StoredEvent],
) -> Result<Lead, DomainError> {
    let mut lead = Lead::new(lead_id);
    for stored in existing_events {
        match decode_event(stored)? {
            Some(event) => lead.apply(&event),
            None => {
                debug!(
                    event_id = %stored.event_id,
                    event_type = %stored.event_type,
                    "skipping unknown event type"
                );
                lead.skip_unknown_event();
            }
        }
    }
    Ok(lead)
}

/// Loads and reconstitutes a lead.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the lead has no events.
pub(crate) async fn load_lead(lead_id: &str, log: &EventLog) -> Result<Lead, DomainError> {
    let existing_events = log.events_for(lead_id).await?;
    if existing_events.is_empty() {
        return Err(DomainError::AggregateNotFound(lead_id.to_owned()));
    }
    reconstitute(lead_id, &existing_events)
}

/// Campaign attribution: the explicit campaign, then the form's
/// `campaign_id`, then its `utm_campaign`. Blank values do not count.
fn resolve_campaign_id(explicit: Option<&str>, form_data: &FormData) -> Option<String> {
    let from_form = |key: &str| form_data.get(key).and_then(serde_json::Value::as_str);
    [explicit, from_form("campaign_id"), from_form("utm_campaign")]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .map(str::to_owned)
}

/// Handles the `CreateLead` command: creates the lead, persists its
/// `lead.created` event and, when a CRM endpoint is configured, enqueues a
/// `send_to_crm` task.
///
/// # Errors
///
/// Returns `DomainError` if appending the event or enqueueing the task fails.
#[instrument(
    skip_all,
    fields(command = CreateLead::COMMAND_TYPE, correlation_id = %command.correlation_id)
)]
pub async fn handle_create_lead(
    command: &CreateLead,
    clock: &dyn Clock,
    log: &EventLog,
) -> Result<LeadCommandResult, DomainError> {
    let campaign_id = resolve_campaign_id(command.campaign_id.as_deref(), &command.form_data);
    let (mut lead, _) = Lead::create(
        command.form_data.clone(),
        command.landing_id.clone(),
        campaign_id.clone(),
        command.correlation_id,
        clock,
    );
    let stored_events = lead.take_stored_events();

    let mut enqueued_tasks = log.append(&lead.id, &stored_events).await?;

    match command.crm_config.as_ref().filter(|config| config.has_endpoint()) {
        Some(crm_config) => {
            let payload = serde_json::json!({
                "lead_id": lead.id,
                "crm_config": crm_config,
            });
            let task = log
                .tasks()
                .push(TaskKind::SendToCrm, payload, Duration::ZERO)
                .await?;
            info!(lead_id = %lead.id, task_id = %task.id, "lead created and queued for CRM");
            enqueued_tasks.push(task);
        }
        None => info!(lead_id = %lead.id, "lead created without CRM integration"),
    }

    Ok(LeadCommandResult {
        aggregate_id: lead.id,
        campaign_id,
        stored_events,
        enqueued_tasks,
    })
}

/// Handles the `RegisterPayment` command: loads the lead, registers the
/// payment and persists the event. The event log's reactions enqueue the
/// ad-platform conversion.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the lead does not exist,
/// `DomainError::Validation` for an invalid amount, or a storage error.
#[instrument(
    skip_all,
    fields(command = RegisterPayment::COMMAND_TYPE, lead_id = %command.lead_id)
)]
pub async fn handle_register_payment(
    command: &RegisterPayment,
    clock: &dyn Clock,
    log: &EventLog,
) -> Result<LeadCommandResult, DomainError> {
    let mut lead = load_lead(&command.lead_id, log).await?;

    lead.register_payment(
        command.payment.clone(),
        command.source.clone(),
        command.correlation_id,
        clock,
    )?;
    let stored_events = lead.take_stored_events();

    let enqueued_tasks = log.append(&lead.id, &stored_events).await?;
    info!(
        amount = command.payment.amount,
        tasks = enqueued_tasks.len(),
        "payment registered"
    );

    Ok(LeadCommandResult {
        campaign_id: lead.campaign_id().map(str::to_owned),
        aggregate_id: lead.id,
        stored_events,
        enqueued_tasks,
    })
}

//! Reactions wired into the event log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadflow_core::error::DomainError;
use leadflow_core::repository::StoredEvent;
use leadflow_core::task::{Task, TaskKind};
use tracing::{debug, info};

use crate::application::command_handlers::decode_event;
use crate::application::event_log::{Reaction, ReactionContext, ReactionRegistry};
use crate::domain::events::{LeadEventKind, LeadEventType};

/// The reactions a production event log dispatches: a registered payment
/// queues an ad-platform conversion.
#[must_use]
pub fn standard_reactions() -> ReactionRegistry {
    ReactionRegistry::new().with(
        LeadEventType::PaymentRegistered,
        Arc::new(PaymentConversionReaction),
    )
}

/// Queues a `send_ad_conversion` task for a paid lead that is attributed to
/// a campaign. The campaign is found by scanning the lead's history for its
/// `lead.created` event.
#[derive(Debug)]
pub struct PaymentConversionReaction;

impl PaymentConversionReaction {
    fn campaign_of(history: &[StoredEvent]) -> Result<Option<String>, DomainError> {
        for stored in history {
            if stored.event_type != LeadEventType::LeadCreated.as_str() {
                continue;
            }
            if let Some(event) = decode_event(stored)?
                && let LeadEventKind::LeadCreated(created) = event.kind
            {
                return Ok(created.campaign_id);
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Reaction for PaymentConversionReaction {
    fn name(&self) -> &'static str {
        "payment_conversion"
    }

    async fn react(
        &self,
        event: &StoredEvent,
        ctx: &ReactionContext<'_>,
    ) -> Result<Vec<Task>, DomainError> {
        let Some(decoded) = decode_event(event)? else {
            return Ok(vec![]);
        };
        let LeadEventKind::PaymentRegistered(payment) = decoded.kind else {
            return Ok(vec![]);
        };

        let history = ctx.events.load_events(&event.aggregate_id).await?;
        let Some(campaign_id) = Self::campaign_of(&history)? else {
            debug!(lead_id = %event.aggregate_id, "paid lead has no campaign; no conversion");
            return Ok(vec![]);
        };

        let payload = serde_json::json!({
            "lead_id": event.aggregate_id,
            "campaign_id": campaign_id,
            "payment_amount": payment.payment.amount,
        });
        let task = ctx
            .tasks
            .push(TaskKind::SendAdConversion, payload, Duration::ZERO)
            .await?;
        info!(
            lead_id = %event.aggregate_id,
            %campaign_id,
            task_id = %task.id,
            "queued ad conversion"
        );
        Ok(vec![task])
    }
}

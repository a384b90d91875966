//! Query handlers for the lead lifecycle context.
//!
//! This module contains query handlers that reconstitute leads from stored
//! events and return read-only view DTOs. Aggregate statistics are computed by
//! replaying the full log.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use leadflow_core::error::DomainError;
use leadflow_core::repository::{EventRepository, StoredEvent};
use serde::Serialize;

use crate::application::command_handlers::{decode_event, reconstitute};
use crate::domain::aggregates::{Lead, LeadStatus};
use crate::domain::events::{FormData, LeadEventKind, Payment};

/// Read-only view of a lead aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadView {
    /// The lead identifier.
    pub lead_id: String,
    /// Current lifecycle status.
    pub status: LeadStatus,
    /// Submitted form fields.
    pub form_data: FormData,
    /// Landing page the lead came from.
    pub landing_id: String,
    /// Campaign attribution.
    pub campaign_id: Option<String>,
    /// CRM that accepted the lead.
    pub crm_id: Option<String>,
    /// Latest registered payment.
    pub payment: Option<Payment>,
    /// Conversions accepted by the ad platform.
    pub ad_conversions: u32,
    /// When the lead was created.
    pub created_at: Option<DateTime<Utc>>,
    /// Current version (event count).
    pub version: i64,
}

impl From<&Lead> for LeadView {
    fn from(lead: &Lead) -> Self {
        Self {
            lead_id: lead.id.clone(),
            status: lead.status(),
            form_data: lead.form_data().clone(),
            landing_id: lead.landing_id().to_owned(),
            campaign_id: lead.campaign_id().map(str::to_owned),
            crm_id: lead.crm_id().map(str::to_owned),
            payment: lead.payment().cloned(),
            ad_conversions: lead.ad_conversions(),
            created_at: lead.created_at(),
            version: lead.version,
        }
    }
}

/// A lead together with its full event history.
#[derive(Debug, Serialize)]
pub struct LeadDetails {
    /// Current state.
    pub lead: LeadView,
    /// Every stored event of the lead, in append order.
    pub events: Vec<StoredEvent>,
    /// Number of stored events.
    pub event_count: usize,
}

/// Filter and paging for [`list_leads`].
#[derive(Debug, Clone)]
pub struct LeadFilter {
    /// Only leads attributed to this campaign.
    pub campaign_id: Option<String>,
    /// Only leads in this status.
    pub status: Option<LeadStatus>,
    /// Page size.
    pub limit: usize,
    /// Number of matching leads to skip.
    pub offset: usize,
}

impl Default for LeadFilter {
    fn default() -> Self {
        Self {
            campaign_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// One page of leads, newest first.
#[derive(Debug, Serialize)]
pub struct LeadPage {
    /// The leads on this page.
    pub leads: Vec<LeadView>,
    /// Number of leads matching the filter.
    pub total: usize,
    /// Requested page size.
    pub limit: usize,
    /// Requested offset.
    pub offset: usize,
}

/// Per-campaign funnel figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignStat {
    /// The campaign.
    pub campaign_id: String,
    /// Leads attributed to the campaign.
    pub total_leads: u64,
    /// Payments registered for those leads.
    pub total_payments: u64,
    /// Sum of those payments.
    pub total_revenue: f64,
    /// `total_payments / total_leads` as a percentage; zero without leads.
    pub conversion_rate: f64,
    /// Creation time of the newest lead.
    pub last_lead_at: Option<DateTime<Utc>>,
    /// Time of the newest payment.
    pub last_payment_at: Option<DateTime<Utc>>,
}

/// Service-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    /// Number of leads.
    pub total_leads: usize,
    /// Number of stored events.
    pub total_events: usize,
    /// Leads per status tag.
    pub lead_statuses: BTreeMap<String, u64>,
    /// Stored events per event type.
    pub event_types: BTreeMap<String, u64>,
}

/// Replays the full log into leads, in order of first appearance.
fn replay_all(events: &[StoredEvent]) -> Result<Vec<Lead>, DomainError> {
    let mut order: Vec<&str> = Vec::new();
    let mut streams: HashMap<&str, Vec<StoredEvent>> = HashMap::new();
    for event in events {
        let stream = streams.entry(event.aggregate_id.as_str()).or_insert_with(|| {
            order.push(event.aggregate_id.as_str());
            Vec::new()
        });
        stream.push(event.clone());
    }
    order
        .into_iter()
        .map(|lead_id| reconstitute(lead_id, &streams[lead_id]))
        .collect()
}

/// Retrieves a lead by its aggregate ID, with its event history.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no events exist for the ID.
/// Returns `DomainError::Storage` if the log cannot be read or decoded.
pub async fn get_lead_by_id(
    lead_id: &str,
    repo: &dyn EventRepository,
) -> Result<LeadDetails, DomainError> {
    let stored_events = repo.load_events(lead_id).await?;
    if stored_events.is_empty() {
        return Err(DomainError::AggregateNotFound(lead_id.to_owned()));
    }
    let lead = reconstitute(lead_id, &stored_events)?;
    Ok(LeadDetails {
        lead: LeadView::from(&lead),
        event_count: stored_events.len(),
        events: stored_events,
    })
}

/// Lists leads matching `filter`, newest first.
///
/// # Errors
///
/// Returns `DomainError::Storage` if the log cannot be read or decoded.
pub async fn list_leads(
    filter: &LeadFilter,
    repo: &dyn EventRepository,
) -> Result<LeadPage, DomainError> {
    let all_events = repo.all_events().await?;
    let mut matching: Vec<LeadView> = replay_all(&all_events)?
        .iter()
        .filter(|lead| {
            filter
                .campaign_id
                .as_deref()
                .is_none_or(|campaign| lead.campaign_id() == Some(campaign))
        })
        .filter(|lead| filter.status.is_none_or(|status| lead.status() == status))
        .map(LeadView::from)
        .collect();
    // Stable sort keeps log order among leads created at the same instant.
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = matching.len();
    let leads = matching
        .into_iter()
        .skip(filter.offset)
        .take(filter.limit)
        .collect();
    Ok(LeadPage {
        leads,
        total,
        limit: filter.limit,
        offset: filter.offset,
    })
}

/// Funnel figures for every campaign with at least one lead, busiest first.
///
/// # Errors
///
/// Returns `DomainError::Storage` if the log cannot be read or decoded.
#[allow(clippy::cast_precision_loss)]
pub async fn campaign_stats(repo: &dyn EventRepository) -> Result<Vec<CampaignStat>, DomainError> {
    let all_events = repo.all_events().await?;
    let mut campaign_of: HashMap<String, String> = HashMap::new();
    let mut stats: BTreeMap<String, CampaignStat> = BTreeMap::new();

    for stored in &all_events {
        let Some(event) = decode_event(stored)? else {
            continue;
        };
        match event.kind {
            LeadEventKind::LeadCreated(created) => {
                let Some(campaign_id) = created.campaign_id else {
                    continue;
                };
                let stat = stats
                    .entry(campaign_id.clone())
                    .or_insert_with(|| CampaignStat {
                        campaign_id: campaign_id.clone(),
                        total_leads: 0,
                        total_payments: 0,
                        total_revenue: 0.0,
                        conversion_rate: 0.0,
                        last_lead_at: None,
                        last_payment_at: None,
                    });
                stat.total_leads += 1;
                stat.last_lead_at = Some(stored.occurred_at);
                campaign_of.insert(stored.aggregate_id.clone(), campaign_id);
            }
            LeadEventKind::PaymentRegistered(paid) => {
                let Some(stat) = campaign_of
                    .get(&stored.aggregate_id)
                    .and_then(|campaign_id| stats.get_mut(campaign_id))
                else {
                    continue;
                };
                stat.total_payments += 1;
                stat.total_revenue += paid.payment.amount;
                stat.last_payment_at = Some(stored.occurred_at);
            }
            LeadEventKind::LeadSentToCrm(_) | LeadEventKind::AdConversionReported(_) => {}
        }
    }

    let mut stats: Vec<CampaignStat> = stats
        .into_values()
        .map(|mut stat| {
            if stat.total_leads > 0 {
                stat.conversion_rate =
                    stat.total_payments as f64 / stat.total_leads as f64 * 100.0;
            }
            stat
        })
        .collect();
    stats.sort_by(|a, b| b.total_leads.cmp(&a.total_leads));
    Ok(stats)
}

/// Number of stored events per event type, including types this context
/// does not understand.
///
/// # Errors
///
/// Returns `DomainError::Storage` if the log cannot be read.
pub async fn event_type_counts(
    repo: &dyn EventRepository,
) -> Result<BTreeMap<String, u64>, DomainError> {
    let all_events = repo.all_events().await?;
    Ok(count_event_types(&all_events))
}

fn count_event_types(events: &[StoredEvent]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.event_type.clone()).or_insert(0) += 1;
    }
    counts
}

/// Service-wide lead and event counters.
///
/// # Errors
///
/// Returns `DomainError::Storage` if the log cannot be read or decoded.
pub async fn service_stats(repo: &dyn EventRepository) -> Result<ServiceStats, DomainError> {
    let all_events = repo.all_events().await?;
    let leads = replay_all(&all_events)?;
    let mut lead_statuses = BTreeMap::new();
    for lead in &leads {
        *lead_statuses.entry(lead.status().to_string()).or_insert(0) += 1;
    }
    Ok(ServiceStats {
        total_leads: leads.len(),
        total_events: all_events.len(),
        lead_statuses,
        event_types: count_event_types(&all_events),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone};
    use leadflow_core::clock::Clock;
    use leadflow_test_support::{
        EmptyEventRepository, FailingEventRepository, InMemoryEventRepository, InMemoryTaskQueue,
        ManualClock,
    };
    use uuid::Uuid;

    use super::*;
    use crate::application::command_handlers::{handle_create_lead, handle_register_payment};
    use crate::application::event_log::{EventLog, ReactionRegistry};
    use crate::domain::commands::{CreateLead, RegisterPayment};

    struct Fixture {
        repo: Arc<InMemoryEventRepository>,
        log: EventLog,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
            let repo = Arc::new(InMemoryEventRepository::new());
            let log = EventLog::new(
                repo.clone(),
                Arc::new(InMemoryTaskQueue::new(Arc::new(ManualClock::new(start)))),
                ReactionRegistry::new(),
            );
            Self {
                repo,
                log,
                clock: ManualClock::new(start),
            }
        }

        async fn lead(&self, campaign_id: Option<&str>) -> String {
            self.clock.advance(TimeDelta::minutes(1));
            let command = CreateLead {
                correlation_id: Uuid::new_v4(),
                form_data: FormData::new(),
                landing_id: "landing_a".to_owned(),
                campaign_id: campaign_id.map(str::to_owned),
                crm_config: None,
            };
            handle_create_lead(&command, &self.clock, &self.log)
                .await
                .unwrap()
                .aggregate_id
        }

        async fn pay(&self, lead_id: &str, amount: f64) {
            self.clock.advance(TimeDelta::minutes(1));
            let command = RegisterPayment {
                correlation_id: Uuid::new_v4(),
                lead_id: lead_id.to_owned(),
                payment: Payment {
                    amount,
                    currency: "RUB".to_owned(),
                    payment_id: None,
                },
                source: None,
            };
            handle_register_payment(&command, &self.clock, &self.log)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_lead_by_id_returns_view_and_history() {
        // Arrange
        let fx = Fixture::new();
        let lead_id = fx.lead(Some("camp_1")).await;
        fx.pay(&lead_id, 100.0).await;

        // Act
        let details = get_lead_by_id(&lead_id, fx.repo.as_ref()).await.unwrap();

        // Assert
        assert_eq!(details.lead.lead_id, lead_id);
        assert_eq!(details.lead.status, LeadStatus::Paid);
        assert_eq!(details.lead.campaign_id.as_deref(), Some("camp_1"));
        assert_eq!(details.lead.version, 2);
        assert_eq!(details.event_count, 2);
        assert_eq!(details.events.len(), 2);
    }

    #[tokio::test]
    async fn test_get_lead_by_id_returns_not_found_for_empty_stream() {
        // Act
        let result = get_lead_by_id("lead_none", &EmptyEventRepository).await;

        // Assert
        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_leads_filters_and_pages_newest_first() {
        // Arrange
        let fx = Fixture::new();
        let first = fx.lead(Some("camp_1")).await;
        let _other = fx.lead(Some("camp_2")).await;
        let third = fx.lead(Some("camp_1")).await;
        let fourth = fx.lead(Some("camp_1")).await;
        fx.pay(&third, 10.0).await;

        // Act
        let by_campaign = list_leads(
            &LeadFilter {
                campaign_id: Some("camp_1".to_owned()),
                limit: 2,
                ..LeadFilter::default()
            },
            fx.repo.as_ref(),
        )
        .await
        .unwrap();
        let paid = list_leads(
            &LeadFilter {
                status: Some(LeadStatus::Paid),
                ..LeadFilter::default()
            },
            fx.repo.as_ref(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(by_campaign.total, 3);
        let ids: Vec<&str> = by_campaign.leads.iter().map(|l| l.lead_id.as_str()).collect();
        assert_eq!(ids, vec![fourth.as_str(), third.as_str()]);
        assert!(!ids.contains(&first.as_str()));

        assert_eq!(paid.total, 1);
        assert_eq!(paid.leads[0].lead_id, third);
    }

    #[tokio::test]
    async fn test_campaign_stats_computes_conversion_rate() {
        // Arrange
        let fx = Fixture::new();
        let a1 = fx.lead(Some("camp_a")).await;
        let _a2 = fx.lead(Some("camp_a")).await;
        let b1 = fx.lead(Some("camp_b")).await;
        let _unattributed = fx.lead(None).await;
        fx.pay(&a1, 1000.0).await;
        fx.pay(&b1, 250.5).await;
        let paid_at = fx.clock.now();

        // Act
        let stats = campaign_stats(fx.repo.as_ref()).await.unwrap();

        // Assert
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].campaign_id, "camp_a");
        assert_eq!(stats[0].total_leads, 2);
        assert_eq!(stats[0].total_payments, 1);
        assert!((stats[0].total_revenue - 1000.0).abs() < f64::EPSILON);
        assert!((stats[0].conversion_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats[1].campaign_id, "camp_b");
        assert!((stats[1].conversion_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(stats[1].last_payment_at, Some(paid_at));
    }

    #[tokio::test]
    async fn test_event_type_counts_include_unknown_types() {
        // Arrange
        let fx = Fixture::new();
        let lead_id = fx.lead(None).await;
        fx.pay(&lead_id, 1.0).await;
        let mut foreign = fx.repo.load_events(&lead_id).await.unwrap()[0].clone();
        foreign.event_id = Uuid::new_v4();
        foreign.event_type = "lead.archived".to_owned();
        fx.repo.append_events(&lead_id, &[foreign]).await.unwrap();

        // Act
        let counts = event_type_counts(fx.repo.as_ref()).await.unwrap();
        let stats = service_stats(fx.repo.as_ref()).await.unwrap();

        // Assert
        assert_eq!(
            counts,
            BTreeMap::from([
                ("lead.archived".to_owned(), 1),
                ("lead.created".to_owned(), 1),
                ("lead.payment_registered".to_owned(), 1),
            ])
        );
        assert_eq!(stats.total_leads, 1);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.lead_statuses, BTreeMap::from([("paid".to_owned(), 1)]));
    }

    #[tokio::test]
    async fn test_queries_surface_storage_failure() {
        assert!(matches!(
            campaign_stats(&FailingEventRepository).await,
            Err(DomainError::Storage(_))
        ));
        assert!(matches!(
            list_leads(&LeadFilter::default(), &FailingEventRepository).await,
            Err(DomainError::Storage(_))
        ));
    }
}

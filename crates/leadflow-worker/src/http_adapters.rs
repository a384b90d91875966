//! HTTP implementations of the lead delivery contracts.

use std::collections::HashMap;

use async_trait::async_trait;
use leadflow_core::handler::HandlerError;
use leadflow_leads::domain::events::FormData;
use leadflow_leads::integrations::{
    Conversion, ConversionReporter, CrmConfig, CrmSender, DeliveryOutcome,
};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Posts JSON to `url` and captures the status and body of the answer.
/// Transport failures, timeouts included, become `HandlerError::Failed`.
async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<DeliveryOutcome, HandlerError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|err| HandlerError::Failed(format!("request to {url} failed: {err}")))?;

    let status = response.status().as_u16();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    let text = response
        .text()
        .await
        .map_err(|err| HandlerError::Failed(format!("reading response of {url} failed: {err}")))?;

    debug!(%url, status, "delivery answered");
    Ok(DeliveryOutcome {
        status,
        body: parse_body(&text, is_json),
    })
}

fn parse_body(text: &str, is_json: bool) -> Value {
    if is_json {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
    } else {
        Value::String(text.to_owned())
    }
}

/// Sends leads to a generic CRM endpoint: mapped form fields plus the
/// optional API key, posted as a flat JSON object.
#[derive(Debug, Clone)]
pub struct HttpCrmSender {
    client: reqwest::Client,
}

impl HttpCrmSender {
    /// Creates a sender using `client`, which carries the request timeout.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrmSender for HttpCrmSender {
    async fn send_lead(
        &self,
        form_data: &FormData,
        config: &CrmConfig,
    ) -> Result<DeliveryOutcome, HandlerError> {
        if !config.has_endpoint() {
            return Err(HandlerError::Failed("CRM config has no api_endpoint".to_owned()));
        }
        post_json(&self.client, &config.api_endpoint, &config.map_fields(form_data)).await
    }
}

/// Reports offline conversions to the ad platform, authenticating with the
/// token configured for the conversion's campaign.
#[derive(Debug, Clone)]
pub struct HttpConversionReporter {
    client: reqwest::Client,
    endpoint: String,
    campaign_tokens: HashMap<String, String>,
}

impl HttpConversionReporter {
    /// Creates a reporter posting to `endpoint`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        campaign_tokens: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            campaign_tokens,
        }
    }
}

/// Builds the `AddOfflineConversions` request body.
#[must_use]
pub fn offline_conversion_body(conversion: &Conversion, token: &str) -> Value {
    json!({
        "method": "AddOfflineConversions",
        "param": {
            "Conversions": [{
                "CampaignID": conversion.campaign_id,
                "Yclid": conversion.lead_id,
                "ConversionType": conversion.conversion_type,
                "Value": conversion.value,
                "DateTime": conversion.occurred_at.to_rfc3339(),
            }]
        },
        "token": token,
    })
}

#[async_trait]
impl ConversionReporter for HttpConversionReporter {
    async fn report(&self, conversion: &Conversion) -> Result<DeliveryOutcome, HandlerError> {
        let Some(token) = self.campaign_tokens.get(&conversion.campaign_id) else {
            warn!(campaign_id = %conversion.campaign_id, "no ad platform token for campaign");
            return Ok(DeliveryOutcome {
                status: 404,
                body: Value::String(format!("campaign {} not configured", conversion.campaign_id)),
            });
        };
        let body = offline_conversion_body(conversion, token);
        post_json(&self.client, &self.endpoint, &body).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use leadflow_leads::integrations::PAYMENT_CONVERSION_TYPE;

    use super::*;

    fn conversion(campaign_id: &str) -> Conversion {
        Conversion {
            campaign_id: campaign_id.to_owned(),
            lead_id: "lead_42".to_owned(),
            conversion_type: PAYMENT_CONVERSION_TYPE.to_owned(),
            value: 1200.0,
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        }
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_offline_conversion_body_shape() {
        // Act
        let body = offline_conversion_body(&conversion("camp_1"), "tok_a");

        // Assert
        assert_eq!(
            body,
            json!({
                "method": "AddOfflineConversions",
                "param": {
                    "Conversions": [{
                        "CampaignID": "camp_1",
                        "Yclid": "lead_42",
                        "ConversionType": "PAYMENT",
                        "Value": 1200.0,
                        "DateTime": "2026-01-15T10:00:00+00:00"
                    }]
                },
                "token": "tok_a"
            })
        );
    }

    #[test]
    fn test_parse_body_keeps_non_json_text() {
        assert_eq!(parse_body(r#"{"id":7}"#, true), json!({"id": 7}));
        assert_eq!(parse_body("not json", true), json!("not json"));
        assert_eq!(parse_body(r#"{"id":7}"#, false), json!(r#"{"id":7}"#));
    }

    #[tokio::test]
    async fn test_unconfigured_campaign_is_rejected_without_a_request() {
        // Arrange
        let reporter = HttpConversionReporter::new(
            client(),
            "http://127.0.0.1:9/unused",
            HashMap::from([("camp_1".to_owned(), "tok_a".to_owned())]),
        );

        // Act
        let outcome = reporter.report(&conversion("camp_unknown")).await.unwrap();

        // Assert
        assert_eq!(outcome.status, 404);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_crm_config_without_endpoint_fails_the_attempt() {
        // Arrange
        let sender = HttpCrmSender::new(client());

        // Act
        let result = sender.send_lead(&FormData::new(), &CrmConfig::default()).await;

        // Assert
        assert!(matches!(result, Err(HandlerError::Failed(_))));
    }
}

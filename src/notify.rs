//! Owner notification via a template email service
//!
//! Fire-and-forget from the engine's perspective: failures are logged
//! and never retried, and never roll back a persisted record.

use async_trait::async_trait;

use crate::config::NotifyConfig;
use crate::db::ViolationRecord;
use crate::{Error, Result};

const EMAIL_ENDPOINT: &str = "https://api.emailjs.com/api/v1.0/email/send";

/// Sends a violation notice to the vehicle owner
#[async_trait]
pub trait Notify: Send + Sync {
    /// Notify the owner of a persisted record
    async fn notify(&self, record: &ViolationRecord) -> Result<()>;
}

/// Template-email client
pub struct EmailNotifier {
    client: reqwest::Client,
    config: NotifyConfig,
}

impl EmailNotifier {
    /// Create a notifier; missing credentials make `notify` a no-op
    #[must_use]
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Notify for EmailNotifier {
    async fn notify(&self, record: &ViolationRecord) -> Result<()> {
        let Some(email) = record.owner_email.as_deref() else {
            tracing::debug!(plate = %record.plate, "no owner email, skipping notification");
            return Ok(());
        };

        let (Some(service_id), Some(template_id), Some(public_key)) = (
            self.config.service_id.as_deref(),
            self.config.template_id.as_deref(),
            self.config.public_key.as_deref(),
        ) else {
            tracing::debug!("notification service not configured, skipping");
            return Ok(());
        };

        let violation_list = record
            .crime_types
            .iter()
            .map(|t| t.replace('_', " ").to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");

        let body = serde_json::json!({
            "service_id": service_id,
            "template_id": template_id,
            "user_id": public_key,
            "template_params": {
                "to_name": record.owner_name.as_deref().unwrap_or("Vehicle Owner"),
                "to_email": email,
                "vehicle_number": record.plate,
                "violation_list": violation_list,
                "fine_amount": record.total_fine,
                "date": record.occurred_at.to_rfc3339(),
                "evidence_link": record.evidence_url,
                "message": format!(
                    "A traffic violation has been recorded for your vehicle {}.",
                    record.plate
                ),
            },
        });

        let response = self.client.post(EMAIL_ENDPOINT).json(&body).send().await?;

        if response.status().is_success() {
            tracing::info!(plate = %record.plate, email, "violation notice sent");
            Ok(())
        } else {
            Err(Error::Remote(format!(
                "notification rejected: {}",
                response.status()
            )))
        }
    }
}

//! Read receipts: best-effort SMS and email sent after a secret is viewed.
//!
//! Delivery never affects the response of the request that consumed the
//! secret. Failures are reported on the `scrt::telemetry` target and dropped.

mod mailjet;
mod twilio;

pub use mailjet::{MailjetEmail, DEFAULT_TEMPLATE_ID as DEFAULT_MAILJET_TEMPLATE_ID};
pub use twilio::TwilioSms;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zeroize::ZeroizeOnDrop;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected message ({status}): {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Send `body` to `to` (E.164, with leading `+`).
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Tell `to` that the secret behind `alias` has been viewed and destroyed.
    async fn send_viewed_receipt(&self, to: &str, alias: &str) -> Result<(), NotifyError>;
}

/// Decrypted receipt contacts taken from a consumed secret.
#[derive(Debug, Default, ZeroizeOnDrop)]
pub struct Receipt {
    pub email: Option<String>,
    /// Digits only.
    pub phone_number: Option<String>,
}

impl Receipt {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }
}

#[derive(Clone)]
pub struct ReceiptNotifier {
    sms: Option<Arc<dyn SmsSender>>,
    email: Option<Arc<dyn EmailSender>>,
    public_url: String,
}

impl ReceiptNotifier {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            sms: None,
            email: None,
            public_url: public_url.into(),
        }
    }

    pub fn with_sms(mut self, sender: Arc<dyn SmsSender>) -> Self {
        self.sms = Some(sender);
        self
    }

    pub fn with_email(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email = Some(sender);
        self
    }

    /// Spawn delivery of every receipt channel present in `receipt`.
    ///
    /// SMS and email go out concurrently on one task. The handle is returned so
    /// callers that care (tests) can wait; request handlers drop it.
    pub fn dispatch(&self, alias: &str, receipt: Receipt) -> Option<JoinHandle<()>> {
        if receipt.is_empty() {
            return None;
        }

        let notifier = self.clone();
        let alias = alias.to_owned();
        Some(tokio::spawn(async move {
            let sms = notifier.deliver_sms(&alias, receipt.phone_number.as_deref());
            let email = notifier.deliver_email(&alias, receipt.email.as_deref());
            tokio::join!(sms, email);
        }))
    }

    async fn deliver_sms(&self, alias: &str, phone_number: Option<&str>) {
        let Some(phone_number) = phone_number else {
            return;
        };
        let Some(sender) = &self.sms else {
            debug!(alias, "SMS receipt requested but no SMS provider configured; skipping");
            return;
        };
        let to = format!("+{}", phone_number.trim_start_matches('+'));
        match sender.send_sms(&to, &sms_body(alias, &self.public_url)).await {
            Ok(()) => debug!(alias, "SMS receipt delivered"),
            Err(e) => capture("sms", alias, &e),
        }
    }

    async fn deliver_email(&self, alias: &str, email: Option<&str>) {
        let Some(email) = email else {
            return;
        };
        let Some(sender) = &self.email else {
            debug!(alias, "email receipt requested but no email provider configured; skipping");
            return;
        };
        match sender.send_viewed_receipt(email, alias).await {
            Ok(()) => debug!(alias, "email receipt delivered"),
            Err(e) => capture("email", alias, &e),
        }
    }
}

pub fn sms_body(alias: &str, public_url: &str) -> String {
    format!(
        "scrt.link: The following secret has been viewed and destroyed🔥: {alias}\n\nReply with a secret: {public_url}"
    )
}

/// Report a swallowed best-effort failure.
pub fn capture(channel: &str, alias: &str, error: &dyn std::error::Error) {
    warn!(target: "scrt::telemetry", channel, alias, error = %error, "best-effort operation failed");
}

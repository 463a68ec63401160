use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{EmailSender, NotifyError};

const MAILJET_API: &str = "https://api.mailjet.com";

pub const DEFAULT_TEMPLATE_ID: u64 = 2818166;
const SUBJECT: &str = "Secret has been viewed 🔥";
const SENDER_NAME: &str = "Scrt.link";

/// Templated email via the Mailjet Send API v3.1.
pub struct MailjetEmail {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    api_secret: String,
    template_id: u64,
    sender: String,
}

impl MailjetEmail {
    pub fn new(
        api_key: String,
        api_secret: String,
        template_id: u64,
        sender: String,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "Mailjet API key and secret are required".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::InvalidConfig(format!("build Mailjet client: {e}")))?;

        Ok(Self {
            client,
            api_base: MAILJET_API.into(),
            api_key,
            api_secret,
            template_id,
            sender,
        })
    }

    /// Point the client at a different host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn payload(&self, to: &str, alias: &str) -> serde_json::Value {
        json!({
            "Messages": [{
                "From": { "Email": self.sender, "Name": SENDER_NAME },
                "To": [{ "Email": to, "Name": SENDER_NAME }],
                "Subject": SUBJECT,
                "TemplateID": self.template_id,
                "TemplateLanguage": true,
                "Variables": { "alias": alias },
            }]
        })
    }
}

#[async_trait]
impl EmailSender for MailjetEmail {
    async fn send_viewed_receipt(&self, to: &str, alias: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(format!("{}/v3.1/send", self.api_base.trim_end_matches('/')))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(&self.payload(to, alias))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender(base: &str) -> MailjetEmail {
        MailjetEmail::new(
            "key".into(),
            "secret".into(),
            DEFAULT_TEMPLATE_ID,
            "no-reply@scrt.link".into(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_api_base(base)
    }

    #[tokio::test]
    async fn sends_template_with_alias_variable() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3.1/send"))
            .and(basic_auth("key", "secret"))
            .and(body_partial_json(json!({
                "Messages": [{
                    "To": [{ "Email": "neo@example.com" }],
                    "TemplateID": DEFAULT_TEMPLATE_ID,
                    "Variables": { "alias": "abc123" },
                }]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock)
            .await;

        sender(&mock.uri())
            .send_viewed_receipt("neo@example.com", "abc123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_is_rejected() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock)
            .await;

        let err = sender(&mock.uri())
            .send_viewed_receipt("neo@example.com", "abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { .. }));
    }
}

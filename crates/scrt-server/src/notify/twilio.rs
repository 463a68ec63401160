use std::time::Duration;

use async_trait::async_trait;

use super::{NotifyError, SmsSender};

const TWILIO_API: &str = "https://api.twilio.com";

/// SMS via the Twilio Messages API.
pub struct TwilioSms {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl TwilioSms {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from: String,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        if account_sid.is_empty() || auth_token.is_empty() || from.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "Twilio account SID, auth token and sender number are all required".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::InvalidConfig(format!("build Twilio client: {e}")))?;

        Ok(Self {
            client,
            api_base: TWILIO_API.into(),
            account_sid,
            auth_token,
            from,
        })
    }

    /// Point the client at a different host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from.as_str()), ("Body", body)])
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

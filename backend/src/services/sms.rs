use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SmsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SMS provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Decrypted messaging credentials for one owner. Only lives for the
/// duration of a single SMS step.
#[derive(Clone)]
pub struct SmsCredentials {
    pub account_id: String,
    pub auth_token: String,
    pub from_number: String,
}

impl fmt::Debug for SmsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmsCredentials")
            .field("account_id", &self.account_id)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .finish()
    }
}

#[async_trait]
pub trait SmsClient: Send + Sync {
    async fn send_message(&self, body: &str, from: &str, to: &str) -> Result<(), SmsError>;
}

/// Builds a client bound to one set of credentials. Called once per SMS step,
/// so a rotated secret is picked up by the very next send.
pub trait SmsClientFactory: Send + Sync {
    fn build(&self, credentials: SmsCredentials) -> Result<Box<dyn SmsClient>, SmsError>;
}

pub struct TwilioSmsFactory {
    base_url: String,
}

impl TwilioSmsFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl SmsClientFactory for TwilioSmsFactory {
    fn build(&self, credentials: SmsCredentials) -> Result<Box<dyn SmsClient>, SmsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Box::new(TwilioSmsClient {
            http,
            base_url: self.base_url.clone(),
            credentials,
        }))
    }
}

pub struct TwilioSmsClient {
    http: reqwest::Client,
    base_url: String,
    credentials: SmsCredentials,
}

#[async_trait]
impl SmsClient for TwilioSmsClient {
    async fn send_message(&self, body: &str, from: &str, to: &str) -> Result<(), SmsError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.credentials.account_id
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .form(&[("Body", body), ("From", from), ("To", to)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SmsError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("SMS sent to {}", to);
        Ok(())
    }
}

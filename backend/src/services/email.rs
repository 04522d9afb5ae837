use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{EmailApiConfig, SmtpConfig};

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Message build failed: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// A single outgoing automation email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from_name: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html: String,
}

/// Email delivery as the automation engine sees it. `Ok(false)` means every
/// provider declined; callers treat it the same as an error.
#[async_trait]
pub trait EmailDelivery: Send + Sync {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<bool, EmailError>;
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

#[derive(Clone)]
pub struct SmtpEmailProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
}

impl SmtpEmailProvider {
    pub fn new(smtp_config: &SmtpConfig) -> Result<Self, EmailError> {
        let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)?
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(Self {
            transport,
            from_email: smtp_config.from_email.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let from = Mailbox::new(Some(email.from_name.clone()), self.from_email.parse::<Address>()?);
        let to: Mailbox = email.to.parse()?;

        let mut builder = Message::builder().from(from).to(to).subject(&email.subject);
        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(reply_to.parse()?);
        }

        let message = builder
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())?;

        self.transport.send(message).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ApiEmailRequest<'a> {
    from: String,
    to: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    html: &'a str,
}

/// JSON-over-HTTPS email API (Resend-compatible request shape).
#[derive(Clone)]
pub struct HttpEmailProvider {
    http: reqwest::Client,
    config: EmailApiConfig,
}

impl HttpEmailProvider {
    pub fn new(config: EmailApiConfig) -> Result<Self, EmailError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    fn name(&self) -> &'static str {
        "http_api"
    }

    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let request = ApiEmailRequest {
            from: format!("{} <{}>", email.from_name, self.config.from_email),
            to: [email.to.as_str()],
            reply_to: email.reply_to.as_deref(),
            subject: &email.subject,
            html: &email.html,
        };

        let response = self
            .http
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Tries each configured provider in order until one accepts the message.
pub struct FailoverEmailService {
    providers: Vec<Box<dyn EmailProvider>>,
}

impl FailoverEmailService {
    pub fn new(providers: Vec<Box<dyn EmailProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl EmailDelivery for FailoverEmailService {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<bool, EmailError> {
        if self.providers.is_empty() {
            error!("No email provider configured, cannot send to {}", email.to);
            return Ok(false);
        }

        for provider in &self.providers {
            match provider.deliver(email).await {
                Ok(()) => {
                    info!("Email sent successfully to {} via {}", email.to, provider.name());
                    return Ok(true);
                }
                Err(e) => {
                    warn!("Email provider {} failed for {}: {}", provider.name(), email.to, e);
                }
            }
        }

        error!("All email providers failed for {}", email.to);
        Ok(false)
    }
}

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_sesv2::{
    config::{Builder as SesConfigBuilder, Region},
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use tracing::{info, instrument};

use crate::config::EmailConfig;

/// Outbound mail capability.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SesMailer {
    client: Client,
    from: String,
}

impl SesMailer {
    pub async fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let mut loader = defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }
        let shared = loader.load().await;

        let mut conf = SesConfigBuilder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            conf = conf.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(conf.build()),
            from: config.from.clone(),
        })
    }
}

fn utf8(data: &str) -> anyhow::Result<Content> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .context("ses content")
}

#[async_trait]
impl EmailSender for SesMailer {
    #[instrument(skip(self, body))]
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .subject(utf8(subject)?)
            .body(Body::builder().text(utf8(body)?).build())
            .build();

        let out = self
            .client
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .context("ses send_email")?;
        info!(message_id = ?out.message_id(), "email sent");
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingMailer;

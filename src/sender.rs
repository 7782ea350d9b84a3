use std::env;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::{info, warn};

/// A send that the provider did not accept. Recorded on the delivery
/// record; never bubbles out of a cycle as a crate error.
#[derive(Clone, Debug)]
pub struct ProviderError {
    detail: String,
}

impl ProviderError {
    pub fn new(detail: impl Into<String>) -> ProviderError {
        ProviderError {
            detail: detail.into(),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.detail)
    }
}

impl std::error::Error for ProviderError {}

/// What a robocall plays: either the campaign's inline script run through
/// text-to-speech, or a pre-recorded asset.
#[derive(Clone, Debug)]
pub enum RoboCallContent {
    Script(String),
    Recording { url: String },
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait VoiceSender: Send + Sync {
    async fn place_robo_call(
        &self,
        to: &str,
        content: &RoboCallContent,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> Result<(), ProviderError>;
}

#[derive(Clone)]
pub struct Senders {
    pub sms: Arc<dyn SmsSender>,
    pub voice: Arc<dyn VoiceSender>,
    pub email: Arc<dyn EmailSender>,
}

impl Senders {
    /// Wire transports from the environment; anything unconfigured falls
    /// back to the log transport so a dev instance runs end-to-end.
    pub fn from_env() -> Senders {
        let sms: Arc<dyn SmsSender> = match env::var("SMS_GATEWAY_URL") {
            Ok(url) => Arc::new(HttpGatewaySender::new(url)),
            Err(_) => Arc::new(LogSender),
        };

        let voice: Arc<dyn VoiceSender> = match env::var("VOICE_GATEWAY_URL") {
            Ok(url) => Arc::new(HttpGatewaySender::new(url)),
            Err(_) => Arc::new(LogSender),
        };

        let email: Arc<dyn EmailSender> = match SmtpEmailSender::from_env() {
            Some(sender) => Arc::new(sender),
            None => Arc::new(LogSender),
        };

        Senders { sms, voice, email }
    }
}

/// Dev transport: logs the send and reports success.
pub struct LogSender;

#[async_trait]
impl SmsSender for LogSender {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ProviderError> {
        info!("sms to {}: {}", to, body);
        Ok(())
    }
}

#[async_trait]
impl VoiceSender for LogSender {
    async fn place_robo_call(
        &self,
        to: &str,
        content: &RoboCallContent,
    ) -> Result<(), ProviderError> {
        match content {
            RoboCallContent::Script(script) => info!("robocall to {} with script: {}", to, script),
            RoboCallContent::Recording { url } => {
                info!("robocall to {} with recording: {}", to, url)
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmailSender for LogSender {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        _html: &str,
        _text: Option<&str>,
    ) -> Result<(), ProviderError> {
        info!("email to {}: {}", to, subject);
        Ok(())
    }
}

/// Provider-agnostic gateway adapter: posts the send as json to the
/// configured webhook and treats any non-2xx as a provider rejection.
pub struct HttpGatewaySender {
    client: reqwest::Client,
    url: String,
}

impl HttpGatewaySender {
    pub fn new(url: String) -> HttpGatewaySender {
        HttpGatewaySender {
            client: reqwest::Client::new(),
            url,
        }
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ProviderError::new(format!("gateway request failed: {}", err)))?;

        if !response.status().is_success() {
            return Err(ProviderError::new(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl SmsSender for HttpGatewaySender {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ProviderError> {
        self.post(json!({ "to": to, "body": body })).await
    }
}

#[async_trait]
impl VoiceSender for HttpGatewaySender {
    async fn place_robo_call(
        &self,
        to: &str,
        content: &RoboCallContent,
    ) -> Result<(), ProviderError> {
        let payload = match content {
            RoboCallContent::Script(script) => json!({ "to": to, "script": script }),
            RoboCallContent::Recording { url } => json!({ "to": to, "recording_url": url }),
        };
        self.post(payload).await
    }
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn from_env() -> Option<SmtpEmailSender> {
        let host = env::var("SMTP_HOST").ok()?;
        let from: Mailbox = match env::var("SMTP_FROM").ok()?.parse() {
            Ok(from) => from,
            Err(err) => {
                warn!("SMTP_FROM is not a valid mailbox: {}", err);
                return None;
            }
        };

        let builder = match AsyncSmtpTransport::<Tokio1Executor>::relay(&host) {
            Ok(builder) => builder,
            Err(err) => {
                warn!("smtp relay {} rejected: {}", host, err);
                return None;
            }
        };

        let builder = match (env::var("SMTP_USERNAME"), env::var("SMTP_PASSWORD")) {
            (Ok(username), Ok(password)) => {
                builder.credentials(Credentials::new(username, password))
            }
            _ => builder,
        };

        Some(SmtpEmailSender {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> Result<(), ProviderError> {
        let to: Mailbox = to
            .parse()
            .map_err(|err| ProviderError::new(format!("invalid recipient address: {}", err)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                text.unwrap_or_default().to_string(),
                html.to_string(),
            ))
            .map_err(|err| ProviderError::new(format!("could not build message: {}", err)))?;

        self.transport
            .send(message)
            .await
            .map_err(|err| ProviderError::new(format!("smtp send failed: {}", err)))?;

        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// Test transport: succeeds unless the address is scripted to fail,
    /// recording every accepted send.
    #[derive(Default)]
    pub struct ScriptedSender {
        pub fail_addresses: HashSet<String>,
        pub sent: Mutex<Vec<String>>,
    }

    impl ScriptedSender {
        pub fn failing(addresses: &[&str]) -> ScriptedSender {
            ScriptedSender {
                fail_addresses: addresses.iter().map(|a| a.to_string()).collect(),
                sent: Mutex::new(vec![]),
            }
        }

        pub fn sent_addresses(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, to: &str) -> Result<(), ProviderError> {
            if self.fail_addresses.contains(to) {
                return Err(ProviderError::new("provider rejected the address"));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl SmsSender for ScriptedSender {
        async fn send_sms(&self, to: &str, _body: &str) -> Result<(), ProviderError> {
            self.record(to)
        }
    }

    #[async_trait]
    impl VoiceSender for ScriptedSender {
        async fn place_robo_call(
            &self,
            to: &str,
            _content: &RoboCallContent,
        ) -> Result<(), ProviderError> {
            self.record(to)
        }
    }

    #[async_trait]
    impl EmailSender for ScriptedSender {
        async fn send_email(
            &self,
            to: &str,
            _subject: &str,
            _html: &str,
            _text: Option<&str>,
        ) -> Result<(), ProviderError> {
            self.record(to)
        }
    }

    impl Senders {
        pub fn scripted(sender: Arc<ScriptedSender>) -> Senders {
            Senders {
                sms: sender.clone(),
                voice: sender.clone(),
                email: sender,
            }
        }
    }
}

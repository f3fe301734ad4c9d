use crate::{
    config::{Encryption, SmtpSettings},
    emails::EmailDocument,
};
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::fmt::Display;
use thiserror::Error;
use tracing::info;

/// SMTP connection for one request, sending as the configured sender.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    debug_level: u8,
}

pub struct OutgoingEmail {
    pub to: Vec<Mailbox>,
    pub reply_to: Option<Mailbox>,
    pub document: EmailDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    Customer,
    Owner,
}

impl Display for DeliveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStage::Customer => write!(f, "customer thank-you"),
            DeliveryStage::Owner => write!(f, "owner notification"),
        }
    }
}

impl Mailer {
    pub fn new(
        settings: &SmtpSettings,
        sender: Mailbox,
        credentials: Option<Credentials>,
    ) -> Result<Self, lettre::transport::smtp::Error> {
        let builder = match settings.encryption {
            Encryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?,
            Encryption::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            }
            Encryption::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
        }
        .port(settings.port);
        let builder = match credentials {
            Some(credentials) => builder
                .credentials(credentials)
                .authentication(vec![Mechanism::Plain, Mechanism::Login]),
            None => builder,
        };
        Ok(Self {
            transport: builder.build(),
            sender,
            debug_level: settings.debug_level,
        })
    }

    pub async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
        let OutgoingEmail {
            to,
            reply_to,
            document,
        } = email;
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(document.subject);
        for recipient in to {
            builder = builder.to(recipient);
        }
        if let Some(reply_to) = reply_to {
            builder = builder.reply_to(reply_to);
        }
        let message = builder.multipart(MultiPart::alternative_plain_html(
            document.text,
            document.html,
        ))?;

        if self.debug_level >= 2 {
            info!("Sending message with envelope {:?}", message.envelope());
        }
        let response = self.transport.send(message).await?;
        if self.debug_level >= 1 {
            info!(
                "SMTP server replied {}: {}",
                response.code(),
                response.message().collect::<Vec<_>>().join(" ")
            );
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Error sending message: {0}")]
    Send(#[from] lettre::transport::smtp::Error),
}

#[cfg(test)]
mod tests {
    use super::{DeliveryError, Mailer, OutgoingEmail};
    use crate::{
        config::{Encryption, SmtpSettings},
        emails::EmailDocument,
    };
    use googletest::prelude::*;
    use lettre::transport::smtp::authentication::Credentials;

    fn settings(encryption: Encryption) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".into(),
            port: 1,
            encryption,
            auth: true,
            debug_level: 2,
        }
    }

    #[tokio::test]
    async fn builds_transport_for_every_encryption_mode() -> Result<()> {
        for encryption in [Encryption::Tls, Encryption::StartTls, Encryption::None] {
            let mailer = Mailer::new(
                &settings(encryption),
                "PilateSpot <noreply@example.com>".parse().unwrap(),
                Some(Credentials::new("user".into(), "password".into())),
            );
            verify_that!(mailer.is_ok(), eq(true))?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn reports_send_error_when_server_is_unreachable() -> Result<()> {
        let mailer = Mailer::new(
            &settings(Encryption::None),
            "PilateSpot <noreply@example.com>".parse().unwrap(),
            None,
        )
        .unwrap();

        let result = mailer
            .send(OutgoingEmail {
                to: vec!["anna@example.com".parse().unwrap()],
                reply_to: None,
                document: EmailDocument {
                    subject: "Subject".into(),
                    html: "<p>Body</p>".into(),
                    text: "Body".into(),
                },
            })
            .await;

        verify_that!(matches!(result, Err(DeliveryError::Send(_))), eq(true))
    }
}

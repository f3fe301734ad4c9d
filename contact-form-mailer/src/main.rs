mod config;
mod emails;
mod mailer;
mod secrets;
mod submission;
mod template;

use anyhow::{anyhow, Context};
use async_once_cell::OnceCell;
use chrono::Local;
use config::{Config, Encryption};
use emails::EmailTemplates;
use futures::FutureExt;
use lambda_http::{
    http::{header::CONTENT_TYPE, Method, StatusCode},
    run, service_fn, Body, Error, Request, Response,
};
use lettre::{message::Mailbox, transport::smtp::authentication::Credentials};
use mailer::{DeliveryError, DeliveryStage, Mailer, OutgoingEmail};
use secrets::{AwsSecretsManagerSecretRepository, SecretError, SecretRepository};
use serde::{Deserialize, Serialize};
use std::{any::Any, panic::AssertUnwindSafe};
use submission::{ContactFormMessage, FieldError};
use thiserror::Error;
use tracing::{error, info, warn};

const SMTP_CREDENTIALS_NAME: &str = "smtp-credentials";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const SUCCESS_MESSAGE: &str = "Thank you! Your message has been sent. We will get back to you soon.";
const VALIDATION_FAILED_MESSAGE: &str = "Please fix the errors in the form.";
const CUSTOMER_DELIVERY_FAILED_MESSAGE: &str =
    "We could not send the confirmation email to you. Please try again later.";
const OWNER_DELIVERY_FAILED_MESSAGE: &str =
    "We could not send the notification to the studio. Please try again later.";
const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again later.";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let handler = ContactFormMessageHandler::<AwsSecretsManagerSecretRepository>::new().await;
    run(service_fn(|event| handler.handle(event))).await
}

struct ContactFormMessageHandler<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    smtp_credentials: OnceCell<SmtpCredentials>,
}

impl<SecretRepositoryT: SecretRepository> ContactFormMessageHandler<SecretRepositoryT> {
    async fn new() -> Self {
        Self {
            secrets_repository: SecretRepositoryT::open().await,
            smtp_credentials: Default::default(),
        }
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let outcome = AssertUnwindSafe(self.process_submission(event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(SubmissionError::UnexpectedFailure(anyhow!(
                    "Panic while processing submission: {}",
                    panic_message(panic.as_ref())
                )))
            });
        let response = match outcome {
            Ok(()) => SubmissionResponse::success(),
            Err(error) => {
                error.log();
                error.into_response()
            }
        };
        response.into_http()
    }

    async fn process_submission(&self, event: Request) -> Result<(), SubmissionError> {
        if event.method() != Method::POST {
            return Err(SubmissionError::MethodNotAllowed(event.method().clone()));
        }
        let config = Config::from_env().context("Invalid configuration")?;

        let message = ContactFormMessage::from_request(&event);
        message.log_received();
        let submission = message
            .validate(config.max_message_length)
            .map_err(SubmissionError::ValidationFailed)?;

        let templates = EmailTemplates::load(config.template_dir.as_deref())
            .context("Could not load email templates")?;
        let mailer = self.open_mailer(&config).await?;
        let customer = Mailbox::new(Some(submission.header_name()), submission.email.clone());

        let thank_you = templates
            .customer_thank_you(&submission)
            .context("Could not render thank-you email")?;
        mailer
            .send(OutgoingEmail {
                to: vec![customer.clone()],
                reply_to: Some(config.owner.clone()),
                document: thank_you,
            })
            .await
            .map_err(|error| SubmissionError::DeliveryFailed {
                stage: DeliveryStage::Customer,
                error,
            })?;
        info!(email = %submission.email, "Sent thank-you email");

        let notification = templates
            .owner_notification(&submission, &Local::now())
            .context("Could not render owner notification")?;
        let mut recipients = vec![config.owner];
        recipients.extend(config.notify);
        mailer
            .send(OutgoingEmail {
                to: recipients,
                reply_to: Some(customer),
                document: notification,
            })
            .await
            .map_err(|error| SubmissionError::DeliveryFailed {
                stage: DeliveryStage::Owner,
                error,
            })?;
        info!(email = %submission.email, "Sent owner notification");

        Ok(())
    }

    async fn open_mailer(&self, config: &Config) -> Result<Mailer, SubmissionError> {
        let credentials = if !config.smtp.auth {
            None
        } else if config.smtp.encryption == Encryption::None {
            // Credentials never travel over a plaintext connection. A server which requires them
            // will reject the message instead.
            warn!("SMTP authentication is enabled but the connection is unencrypted; not sending credentials");
            None
        } else {
            let credentials = self
                .smtp_credentials()
                .await
                .context("Could not retrieve SMTP credentials")?;
            Some(Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ))
        };
        let mailer = Mailer::new(&config.smtp, config.sender.clone(), credentials)
            .context("Could not set up SMTP transport")?;
        Ok(mailer)
    }

    async fn smtp_credentials(&self) -> Result<&SmtpCredentials, SecretError> {
        self.smtp_credentials
            .get_or_try_init(self.secrets_repository.get_secret(SMTP_CREDENTIALS_NAME))
            .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

#[derive(Deserialize)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}

#[derive(Debug, Error)]
enum SubmissionError {
    #[error("Request method {0} is not supported")]
    MethodNotAllowed(Method),
    #[error("Submission failed validation: {}", describe_field_errors(.0))]
    ValidationFailed(Vec<FieldError>),
    #[error("Could not send {stage} email: {error}")]
    DeliveryFailed {
        stage: DeliveryStage,
        #[source]
        error: DeliveryError,
    },
    #[error(transparent)]
    UnexpectedFailure(#[from] anyhow::Error),
}

fn describe_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl SubmissionError {
    fn log(&self) {
        match self {
            SubmissionError::MethodNotAllowed(_) | SubmissionError::ValidationFailed(_) => {
                warn!("Client error processing contact form submission: {self}");
            }
            SubmissionError::DeliveryFailed { .. } => {
                error!("Internal error processing contact form submission: {self}");
            }
            SubmissionError::UnexpectedFailure(cause) => {
                error!("Internal error processing contact form submission: {cause:#}");
            }
        }
    }

    fn into_response(self) -> SubmissionResponse {
        match self {
            SubmissionError::MethodNotAllowed(method) => SubmissionResponse::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_FAILURE_MESSAGE,
                vec![format!(
                    "Request method {method} is not supported. Use POST."
                )],
            ),
            SubmissionError::ValidationFailed(errors) => SubmissionResponse::failure(
                StatusCode::BAD_REQUEST,
                VALIDATION_FAILED_MESSAGE,
                errors.iter().map(ToString::to_string).collect(),
            ),
            SubmissionError::DeliveryFailed { stage, error } => SubmissionResponse::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                match stage {
                    DeliveryStage::Customer => CUSTOMER_DELIVERY_FAILED_MESSAGE,
                    DeliveryStage::Owner => OWNER_DELIVERY_FAILED_MESSAGE,
                },
                vec![error.to_string()],
            ),
            SubmissionError::UnexpectedFailure(_) => SubmissionResponse::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_FAILURE_MESSAGE,
                vec![],
            ),
        }
    }
}

#[derive(Serialize)]
struct SubmissionResponse {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    message: &'static str,
    errors: Vec<String>,
}

impl SubmissionResponse {
    fn success() -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: SUCCESS_MESSAGE,
            errors: vec![],
        }
    }

    fn failure(status: StatusCode, message: &'static str, errors: Vec<String>) -> Self {
        Self {
            status,
            success: false,
            message,
            errors,
        }
    }

    fn into_http(self) -> Result<Response<Body>, Error> {
        let body = serde_json::to_string(&self)?;
        Ok(Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Body::Text(body))?)
    }
}

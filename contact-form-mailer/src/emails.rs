use crate::{
    submission::ValidatedSubmission,
    template::{escape_html, nl2br, render},
};
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::{
    borrow::Cow,
    fmt::Display,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tinytemplate::{format_unescaped, TinyTemplate};

const CUSTOMER_TEMPLATE_FILE: &str = "customer-template.html";
const OWNER_TEMPLATE_FILE: &str = "owner-template.html";
const CUSTOMER_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/customer-template.html"
));
const OWNER_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/owner-template.html"
));

const CUSTOMER_TEXT_TEMPLATE_NAME: &str = "customer-text";
const OWNER_TEXT_TEMPLATE_NAME: &str = "owner-text";
const CUSTOMER_TEXT_TEMPLATE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/customer.txt"));
const OWNER_TEXT_TEMPLATE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/owner.txt"));

const CUSTOMER_SUBJECT: &str = "Thank you for contacting PilateSpot";
const OWNER_SUBJECT_PREFIX: &str = "New contact form message from";

const DATE_FORMAT: &str = "%d.%m.%Y %H:%M";

/// A rendered email, ready to be addressed and sent.
#[derive(Debug)]
pub struct EmailDocument {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct EmailTemplates {
    customer: Cow<'static, str>,
    owner: Cow<'static, str>,
}

#[derive(Serialize)]
struct TextContext<'a> {
    name: &'a str,
    email: &'a str,
    message: &'a str,
    date: &'a str,
}

impl EmailTemplates {
    /// Reads the HTML templates from `dir`, or uses the ones bundled with the binary.
    pub fn load(dir: Option<&Path>) -> Result<Self, TemplateError> {
        let Some(dir) = dir else {
            return Ok(Self::builtin());
        };
        Ok(Self {
            customer: read_template(dir.join(CUSTOMER_TEMPLATE_FILE))?.into(),
            owner: read_template(dir.join(OWNER_TEMPLATE_FILE))?.into(),
        })
    }

    pub fn builtin() -> Self {
        Self {
            customer: CUSTOMER_TEMPLATE.into(),
            owner: OWNER_TEMPLATE.into(),
        }
    }

    pub fn customer_thank_you(
        &self,
        submission: &ValidatedSubmission,
    ) -> Result<EmailDocument, TemplateError> {
        let name = escape_html(submission.name);
        let message = escape_html(submission.message);
        let email = submission.email.to_string();
        Ok(EmailDocument {
            subject: CUSTOMER_SUBJECT.into(),
            html: render(
                &self.customer,
                &[("name", name.as_str()), ("message", message.as_str())],
            ),
            text: render_text(
                CUSTOMER_TEXT_TEMPLATE_NAME,
                CUSTOMER_TEXT_TEMPLATE,
                &TextContext {
                    name: submission.name,
                    email: &email,
                    message: submission.message,
                    date: "",
                },
            )?,
        })
    }

    pub fn owner_notification<Tz>(
        &self,
        submission: &ValidatedSubmission,
        received_at: &DateTime<Tz>,
    ) -> Result<EmailDocument, TemplateError>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let name = escape_html(submission.name);
        let email = submission.email.to_string();
        let escaped_email = escape_html(&email);
        let message = nl2br(&escape_html(submission.message));
        let date = received_at.format(DATE_FORMAT).to_string();
        Ok(EmailDocument {
            subject: format!("{OWNER_SUBJECT_PREFIX} {}", submission.header_name()),
            html: render(
                &self.owner,
                &[
                    ("name", name.as_str()),
                    ("email", escaped_email.as_str()),
                    ("message", message.as_str()),
                    ("date", date.as_str()),
                ],
            ),
            text: render_text(
                OWNER_TEXT_TEMPLATE_NAME,
                OWNER_TEXT_TEMPLATE,
                &TextContext {
                    name: submission.name,
                    email: &email,
                    message: submission.message,
                    date: &date,
                },
            )?,
        })
    }
}

fn read_template(path: PathBuf) -> Result<String, TemplateError> {
    std::fs::read_to_string(&path).map_err(|source| TemplateError::Read { path, source })
}

fn render_text(
    name: &'static str,
    template: &'static str,
    context: &TextContext,
) -> Result<String, TemplateError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template(name, template)?;
    Ok(tt.render(name, context)?)
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Could not read template {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not render plain-text body: {0}")]
    Render(#[from] tinytemplate::error::Error),
}

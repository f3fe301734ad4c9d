use lambda_http::{Request, RequestPayloadExt};
use lettre::Address;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{info, warn};

const MIN_NAME_LENGTH: usize = 2;
const MAX_NAME_LENGTH: usize = 100;
const MIN_MESSAGE_LENGTH: usize = 10;

#[derive(Deserialize, Debug, Default)]
pub struct ContactFormMessage {
    #[serde(default, deserialize_with = "lenient_text")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    email: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

// Scalars are accepted as text so that one odd field does not discard the whole body.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<FieldValue>::deserialize(deserializer)?.map(|value| match value {
            FieldValue::Text(text) => text,
            FieldValue::Number(number) => number.to_string(),
            FieldValue::Flag(flag) => flag.to_string(),
        }),
    )
}

impl ContactFormMessage {
    /// Extracts the submitted fields from the request body.
    ///
    /// The body is parsed according to its declared content type first. Only when that yields no
    /// field at all is the raw body tried as JSON, which covers clients posting JSON without a
    /// content type.
    pub fn from_request(event: &Request) -> Self {
        let declared = match event.payload::<ContactFormMessage>() {
            Ok(payload) => payload.unwrap_or_default(),
            Err(error) => {
                warn!("Could not parse request payload: {error}");
                Self::default()
            }
        };
        if !declared.is_blank() {
            return declared;
        }
        serde_json::from_slice(event.body().as_ref()).unwrap_or_default()
    }

    fn is_blank(&self) -> bool {
        [&self.name, &self.email, &self.message]
            .into_iter()
            .all(|field| trimmed(field).is_empty())
    }

    pub fn log_received(&self) {
        info!(
            name = trimmed(&self.name),
            email = trimmed(&self.email),
            message_length = trimmed(&self.message).chars().count(),
            "Received contact form submission"
        );
    }

    /// Checks every field and collects all problems rather than stopping at the first one.
    pub fn validate(
        &self,
        max_message_length: usize,
    ) -> Result<ValidatedSubmission<'_>, Vec<FieldError>> {
        let name = trimmed(&self.name);
        let email = trimmed(&self.email);
        let message = trimmed(&self.message);
        let mut errors = Vec::new();

        let name_length = name.chars().count();
        if name.is_empty() {
            errors.push(FieldError::NameMissing);
        } else if name_length < MIN_NAME_LENGTH {
            errors.push(FieldError::NameTooShort);
        } else if name_length > MAX_NAME_LENGTH {
            errors.push(FieldError::NameTooLong);
        }

        let address = if email.is_empty() {
            errors.push(FieldError::EmailMissing);
            None
        } else {
            let address = parse_email_address(email);
            if address.is_none() {
                errors.push(FieldError::EmailInvalid);
            }
            address
        };

        let message_length = message.chars().count();
        if message.is_empty() {
            errors.push(FieldError::MessageMissing);
        } else if message_length < MIN_MESSAGE_LENGTH {
            errors.push(FieldError::MessageTooShort);
        } else if message_length > max_message_length {
            errors.push(FieldError::MessageTooLong {
                max: max_message_length,
            });
        }

        match address {
            Some(email) if errors.is_empty() => Ok(ValidatedSubmission {
                name,
                email,
                message,
            }),
            _ => Err(errors),
        }
    }
}

fn trimmed(field: &Option<String>) -> &str {
    field.as_deref().map(str::trim).unwrap_or_default()
}

// Single-label domains such as `a@b` are syntactically valid for lettre but never deliverable
// from the public internet.
fn parse_email_address(email: &str) -> Option<Address> {
    let address: Address = email.parse().ok()?;
    let domain = address.domain();
    (domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')).then_some(address)
}

pub struct ValidatedSubmission<'a> {
    pub name: &'a str,
    pub email: Address,
    pub message: &'a str,
}

impl ValidatedSubmission<'_> {
    /// The name with every run of control characters replaced by a single space, for use in mail
    /// headers.
    pub fn header_name(&self) -> String {
        self.name
            .split(char::is_control)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("Name is required.")]
    NameMissing,
    #[error("Name must be at least 2 characters long.")]
    NameTooShort,
    #[error("Name must not be longer than 100 characters.")]
    NameTooLong,
    #[error("Email is required.")]
    EmailMissing,
    #[error("Email address is invalid.")]
    EmailInvalid,
    #[error("Message is required.")]
    MessageMissing,
    #[error("Message must be at least 10 characters long.")]
    MessageTooShort,
    #[error("Message must not be longer than {max} characters.")]
    MessageTooLong { max: usize },
}

#[cfg(test)]
mod tests {
    use super::{ContactFormMessage, FieldError};
    use googletest::prelude::*;
    use lambda_http::{http::HeaderValue, Body, Request};

    const MAX_MESSAGE_LENGTH: usize = 500;

    fn message(name: &str, email: &str, message: &str) -> ContactFormMessage {
        ContactFormMessage {
            name: Some(name.into()),
            email: Some(email.into()),
            message: Some(message.into()),
        }
    }

    fn valid_message() -> ContactFormMessage {
        message(
            "Anna Kowalska",
            "anna@example.com",
            "I would like to book a trial class.",
        )
    }

    fn request(content_type: Option<&'static str>, body: &str) -> Request {
        let mut event = Request::new(Body::Text(body.into()));
        if let Some(content_type) = content_type {
            event
                .headers_mut()
                .append("Content-Type", HeaderValue::from_static(content_type));
        }
        event
    }

    #[test]
    fn accepts_valid_submission() -> Result<()> {
        let input = valid_message();

        let submission = input.validate(MAX_MESSAGE_LENGTH).unwrap();

        verify_that!(submission.name, eq("Anna Kowalska"))?;
        verify_that!(submission.email.to_string(), eq("anna@example.com"))?;
        verify_that!(
            submission.message,
            eq("I would like to book a trial class.")
        )
    }

    #[test]
    fn trims_fields_before_validating() -> Result<()> {
        let input = message(
            "  Anna  ",
            " anna@example.com\n",
            "\t I would like to book a trial class. ",
        );

        let submission = input.validate(MAX_MESSAGE_LENGTH).unwrap();

        verify_that!(submission.name, eq("Anna"))?;
        verify_that!(submission.email.to_string(), eq("anna@example.com"))?;
        verify_that!(
            submission.message,
            eq("I would like to book a trial class.")
        )
    }

    #[test]
    fn collects_an_error_for_every_missing_field() -> Result<()> {
        let input = ContactFormMessage::default();

        let errors = input.validate(MAX_MESSAGE_LENGTH).err().unwrap();

        verify_that!(
            errors,
            elements_are![
                eq(FieldError::NameMissing),
                eq(FieldError::EmailMissing),
                eq(FieldError::MessageMissing)
            ]
        )
    }

    #[test]
    fn treats_whitespace_only_fields_as_missing() -> Result<()> {
        let input = message("   ", "\n", " \t ");

        let errors = input.validate(MAX_MESSAGE_LENGTH).err().unwrap();

        verify_that!(errors.len(), eq(3))
    }

    #[test]
    fn accepts_names_at_length_boundaries() -> Result<()> {
        for name in ["Jo".to_string(), "a".repeat(100)] {
            let input = message(&name, "anna@example.com", "A message long enough");
            verify_that!(input.validate(MAX_MESSAGE_LENGTH).is_ok(), eq(true))?;
        }
        Ok(())
    }

    #[test]
    fn rejects_name_that_is_too_short() -> Result<()> {
        let input = message("J", "anna@example.com", "A message long enough");

        verify_that!(
            input.validate(MAX_MESSAGE_LENGTH).err(),
            some(elements_are![eq(FieldError::NameTooShort)])
        )
    }

    #[test]
    fn rejects_name_that_is_too_long() -> Result<()> {
        let input = message(&"a".repeat(101), "anna@example.com", "A message long enough");

        verify_that!(
            input.validate(MAX_MESSAGE_LENGTH).err(),
            some(elements_are![eq(FieldError::NameTooLong)])
        )
    }

    #[test]
    fn counts_name_length_in_characters() -> Result<()> {
        let input = message(&"ż".repeat(100), "anna@example.com", "A message long enough");

        verify_that!(input.validate(MAX_MESSAGE_LENGTH).is_ok(), eq(true))
    }

    #[test]
    fn rejects_malformed_email_addresses() -> Result<()> {
        for email in ["abc", "a@b", "anna@", "@example.com", "anna@@example.com", "an na@example.com"] {
            let input = message("Anna", email, "A message long enough");
            verify_that!(
                input.validate(MAX_MESSAGE_LENGTH).err(),
                some(elements_are![eq(FieldError::EmailInvalid)])
            )?;
        }
        Ok(())
    }

    #[test]
    fn accepts_ordinary_email_address() -> Result<()> {
        let input = message("Anna", "user@example.com", "A message long enough");

        verify_that!(input.validate(MAX_MESSAGE_LENGTH).is_ok(), eq(true))
    }

    #[test]
    fn accepts_messages_at_length_boundaries() -> Result<()> {
        for text in ["a".repeat(10), "a".repeat(MAX_MESSAGE_LENGTH)] {
            let input = message("Anna", "anna@example.com", &text);
            verify_that!(input.validate(MAX_MESSAGE_LENGTH).is_ok(), eq(true))?;
        }
        Ok(())
    }

    #[test]
    fn rejects_message_that_is_too_short() -> Result<()> {
        let input = message("Anna", "anna@example.com", "Too short");

        verify_that!(
            input.validate(MAX_MESSAGE_LENGTH).err(),
            some(elements_are![eq(FieldError::MessageTooShort)])
        )
    }

    #[test]
    fn rejects_message_that_is_too_long() -> Result<()> {
        let input = message("Anna", "anna@example.com", &"a".repeat(MAX_MESSAGE_LENGTH + 1));

        verify_that!(
            input.validate(MAX_MESSAGE_LENGTH).err(),
            some(elements_are![eq(FieldError::MessageTooLong {
                max: MAX_MESSAGE_LENGTH
            })])
        )
    }

    #[test]
    fn describes_maximum_in_message_too_long_error() -> Result<()> {
        verify_that!(
            FieldError::MessageTooLong { max: 5000 }.to_string(),
            eq("Message must not be longer than 5000 characters.")
        )
    }

    #[test]
    fn collapses_line_breaks_in_header_name() -> Result<()> {
        let input = message(
            "Anna\r\nBcc: evil@attacker.org",
            "anna@example.com",
            "A message long enough",
        );

        let submission = input.validate(MAX_MESSAGE_LENGTH).unwrap();

        verify_that!(submission.header_name(), eq("Anna Bcc: evil@attacker.org"))
    }

    #[test]
    fn keeps_ordinary_name_as_header_name() -> Result<()> {
        let input = valid_message();

        let submission = input.validate(MAX_MESSAGE_LENGTH).unwrap();

        verify_that!(submission.header_name(), eq("Anna Kowalska"))
    }

    #[test]
    fn reads_non_string_json_values_as_text() -> Result<()> {
        let event = request(
            Some("application/json"),
            r#"{"name":"Anna","email":"anna@example.com","message":12345678901}"#,
        );

        let input = ContactFormMessage::from_request(&event);

        verify_that!(
            input,
            matches_pattern!(ContactFormMessage {
                name: some(eq("Anna")),
                email: some(eq("anna@example.com")),
                message: some(eq("12345678901")),
            })
        )
    }

    #[test]
    fn reads_json_null_as_missing_field() -> Result<()> {
        let event = request(
            Some("application/json"),
            r#"{"name":"Anna","email":null,"message":"Hello there, studio!"}"#,
        );

        let input = ContactFormMessage::from_request(&event);

        verify_that!(input.email, none())?;
        verify_that!(input.name, some(eq("Anna")))
    }

    #[test]
    fn reads_json_body() -> Result<()> {
        let event = request(
            Some("application/json"),
            r#"{"name":"Anna","email":"anna@example.com","message":"Hello there, studio!"}"#,
        );

        let input = ContactFormMessage::from_request(&event);

        verify_that!(
            input,
            matches_pattern!(ContactFormMessage {
                name: some(eq("Anna")),
                email: some(eq("anna@example.com")),
                message: some(eq("Hello there, studio!")),
            })
        )
    }

    #[test]
    fn reads_form_encoded_body() -> Result<()> {
        let event = request(
            Some("application/x-www-form-urlencoded"),
            "name=Anna&email=anna%40example.com&message=Hello+there%2C+studio%21",
        );

        let input = ContactFormMessage::from_request(&event);

        verify_that!(
            input,
            matches_pattern!(ContactFormMessage {
                name: some(eq("Anna")),
                email: some(eq("anna@example.com")),
                message: some(eq("Hello there, studio!")),
            })
        )
    }

    #[test]
    fn falls_back_to_json_when_content_type_is_missing() -> Result<()> {
        let event = request(
            None,
            r#"{"name":"Anna","email":"anna@example.com","message":"Hello there, studio!"}"#,
        );

        let input = ContactFormMessage::from_request(&event);

        verify_that!(input.name, some(eq("Anna")))
    }

    #[test]
    fn yields_empty_message_for_unparseable_body() -> Result<()> {
        let event = request(Some("application/json"), "this is not json");

        let input = ContactFormMessage::from_request(&event);

        verify_that!(input.is_blank(), eq(true))
    }
}

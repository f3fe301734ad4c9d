use lettre::{address::AddressError, message::Mailbox, Address};
use std::{path::PathBuf, str::FromStr};
use thiserror::Error;

const DEFAULT_SMTP_HOST: &str = "smtp.pilatespot.pl";
const DEFAULT_FROM_ADDRESS: &str = "noreply@pilatespot.pl";
const DEFAULT_FROM_NAME: &str = "PilateSpot";
const DEFAULT_OWNER_ADDRESS: &str = "kontakt@pilatespot.pl";
const DEFAULT_OWNER_NAME: &str = "PilateSpot";
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 5000;

/// Settings for a single request, read from the function environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub smtp: SmtpSettings,
    pub sender: Mailbox,
    pub owner: Mailbox,
    pub notify: Option<Mailbox>,
    pub max_message_length: usize,
    pub template_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    pub auth: bool,
    pub debug_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// TLS from the first byte, usually on port 465.
    Tls,
    /// Plaintext connection upgraded with STARTTLS, usually on port 587.
    StartTls,
    None,
}

impl Encryption {
    fn default_port(self) -> u16 {
        match self {
            Encryption::Tls => 465,
            Encryption::StartTls => 587,
            Encryption::None => 25,
        }
    }
}

impl FromStr for Encryption {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "smtps" => Ok(Encryption::Tls),
            "starttls" | "tls-starttls" => Ok(Encryption::StartTls),
            "none" | "" => Ok(Encryption::None),
            other => Err(format!(
                "unknown encryption mode {other:?}, expected tls, starttls or none"
            )),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let encryption = parse_var(&var, "SMTP_ENCRYPTION")?.unwrap_or(Encryption::Tls);
        let smtp = SmtpSettings {
            host: var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.into()),
            port: parse_var(&var, "SMTP_PORT")?.unwrap_or(encryption.default_port()),
            encryption,
            auth: parse_flag(&var, "SMTP_AUTH")?.unwrap_or(true),
            debug_level: parse_var(&var, "SMTP_DEBUG")?.unwrap_or(0),
        };

        let sender = mailbox(
            &var,
            ("MAIL_FROM_ADDRESS", DEFAULT_FROM_ADDRESS),
            ("MAIL_FROM_NAME", DEFAULT_FROM_NAME),
        )?;
        let owner = mailbox(
            &var,
            ("OWNER_ADDRESS", DEFAULT_OWNER_ADDRESS),
            ("OWNER_NAME", DEFAULT_OWNER_NAME),
        )?;
        let notify =
            parse_var::<Address>(&var, "NOTIFY_ADDRESS")?.map(|email| Mailbox::new(None, email));

        let max_message_length =
            parse_var(&var, "MAX_MESSAGE_LENGTH")?.unwrap_or(DEFAULT_MAX_MESSAGE_LENGTH);
        if max_message_length == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MAX_MESSAGE_LENGTH",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Config {
            smtp,
            sender,
            owner,
            notify,
            max_message_length,
            template_dir: var("TEMPLATE_DIR").map(PathBuf::from),
        })
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|value| {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|error| ConfigError::InvalidValue {
                var: key,
                value,
                reason: error.to_string(),
            })
        })
        .transpose()
}

fn parse_flag(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    var(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var: key,
                value,
                reason: "expected true or false".into(),
            }),
        })
        .transpose()
}

fn mailbox(
    var: &impl Fn(&str) -> Option<String>,
    (address_key, default_address): (&'static str, &str),
    (name_key, default_name): (&'static str, &str),
) -> Result<Mailbox, ConfigError> {
    let address = match parse_var::<Address>(var, address_key)? {
        Some(address) => address,
        None => default_address
            .parse()
            .map_err(|error: AddressError| ConfigError::InvalidValue {
                var: address_key,
                value: default_address.into(),
                reason: error.to_string(),
            })?,
    };
    let name = var(name_key).unwrap_or_else(|| default_name.into());
    Ok(Mailbox::new(Some(name), address))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

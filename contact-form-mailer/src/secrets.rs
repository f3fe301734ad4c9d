use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use serde::de::DeserializeOwned;
use thiserror::Error;

const FALLBACK_REGION: &str = "eu-central-1";

#[async_trait]
pub trait SecretRepository {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, SecretError>;
}

pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let region = RegionProviderChain::default_provider().or_else(FALLBACK_REGION);
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self(aws_sdk_secretsmanager::Client::new(&config))
    }

    async fn get_secret<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, SecretError> {
        let secret = self
            .0
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|error| SecretError::Fetch {
                name,
                source: error.into(),
            })?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(SecretError::MissingValue(name));
        };
        serde_json::from_str(secret_value).map_err(|source| SecretError::Malformed { name, source })
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Could not fetch secret {name}: {source}")]
    Fetch {
        name: &'static str,
        source: aws_sdk_secretsmanager::Error,
    },
    #[error("Secret {0} has no string value")]
    MissingValue(&'static str),
    #[error("Secret {name} is not valid JSON of the expected shape: {source}")]
    Malformed {
        name: &'static str,
        source: serde_json::Error,
    },
}

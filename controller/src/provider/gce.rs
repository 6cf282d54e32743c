//! Google Compute Engine adapter: REST calls against the v1 instances API,
//! authenticated via the metadata server of the hosting environment.

use alloc::sync::Arc;
use core::future::Future;
use core::time::Duration;

use eyre::WrapErr as _;
use reqwest::StatusCode;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::config::InstanceIdentity;

use super::{InstanceDescription, InstanceStatus, ProviderError};

const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the provider-reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(4);
// Keeps the worst-case retry budget well inside the operation deadline; the
// coordinator truncates anything that still overruns.
const MAX_ATTEMPTS: u32 = 4;

struct CachedToken {
    token: Arc<SecretString>,
    expires_at: Instant,
}

/// Client for one specific instance; identity and credentials are read-only
/// after construction.
#[derive(Clone)]
pub struct GceClient {
    http: reqwest::Client,
    identity: Arc<InstanceIdentity>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct GceOperation {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GceInstance {
    name: String,
    status: String,
    machine_type: Option<String>,
    #[serde(default)]
    network_interfaces: Vec<GceNetworkInterface>,
}

#[derive(Deserialize)]
struct GceNetworkInterface {
    #[serde(rename = "networkIP")]
    network_ip: Option<String>,
    #[serde(default, rename = "accessConfigs")]
    access_configs: Vec<GceAccessConfig>,
}

#[derive(Deserialize)]
struct GceAccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

impl GceClient {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(identity: InstanceIdentity) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to build the provider HTTP client")?;
        Ok(Self {
            http,
            identity: Arc::new(identity),
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// # Errors
    ///
    /// See [`ProviderError`]; transient failures were already retried.
    pub async fn start_instance(&self) -> Result<String, ProviderError> {
        self.with_retry("instance start", || self.mutate("start"))
            .await
    }

    /// # Errors
    ///
    /// See [`ProviderError`]; transient failures were already retried.
    pub async fn stop_instance(&self) -> Result<String, ProviderError> {
        self.with_retry("instance stop", || self.mutate("stop"))
            .await
    }

    /// # Errors
    ///
    /// See [`ProviderError`]; transient failures were already retried.
    pub async fn describe_instance(&self) -> Result<InstanceDescription, ProviderError> {
        self.with_retry("instance describe", || self.describe_once())
            .await
    }

    fn instance_url(&self) -> String {
        let InstanceIdentity {
            ref project,
            ref zone,
            ref name,
        } = *self.identity;
        format!("{COMPUTE_BASE}/projects/{project}/zones/{zone}/instances/{name}")
    }

    /// Fetches (or reuses) a service-account access token from the metadata
    /// server. Credentials never leave this module.
    async fn access_token(&self) -> Result<Arc<SecretString>, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(ref entry) = *cached
            && Instant::now() < entry.expires_at
        {
            return Ok(entry.token.clone());
        }

        debug!("Requesting fresh access token from metadata server");
        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("metadata server unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "metadata token request", ""));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("malformed token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let secret = Arc::new(SecretString::from(token.access_token));
        *cached = Some(CachedToken {
            token: secret.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(secret)
    }

    /// Runs `call` with bounded exponential backoff on transient failures.
    async fn with_retry<T, Fut>(
        &self,
        what: &str,
        call: impl Fn() -> Fut,
    ) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(%error, attempt, "Transient failure during {what}, backing off");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn mutate(&self, verb: &str) -> Result<String, ProviderError> {
        let token = self.access_token().await?;
        let url = format!("{}/{verb}", self.instance_url());
        let response = self
            .http
            .post(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{verb} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, verb, &body));
        }
        let operation: GceOperation = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("malformed operation response: {e}")))?;
        Ok(operation.name)
    }

    async fn describe_once(&self) -> Result<InstanceDescription, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.instance_url())
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("describe request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, "describe", &body));
        }
        let instance: GceInstance = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("malformed instance response: {e}")))?;
        Ok(flatten_instance(instance))
    }
}

/// Flattens the provider resource into the controller's view of the instance.
fn flatten_instance(instance: GceInstance) -> InstanceDescription {
    // machineType comes back as a full resource URL
    let machine_type = instance
        .machine_type
        .as_deref()
        .and_then(|url| url.rsplit('/').next())
        .map(str::to_string);

    let mut internal_ip = None;
    let mut external_ip = None;
    if let Some(interface) = instance.network_interfaces.first() {
        internal_ip = interface.network_ip.clone();
        external_ip = interface
            .access_configs
            .iter()
            .find_map(|config| config.nat_ip.clone());
    }

    InstanceDescription {
        name: instance.name,
        status: InstanceStatus::parse(&instance.status),
        machine_type,
        internal_ip,
        external_ip,
    }
}

/// Sorts a provider HTTP status into the retry/no-retry error kinds.
fn classify_status(status: StatusCode, what: &str, body: &str) -> ProviderError {
    let detail = body_snippet(body);
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(format!("{what}: {detail}")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::PermissionDenied(format!("{what}: {detail}"))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Transient(format!("{what}: rate limited")),
        code if code.is_server_error() => {
            ProviderError::Transient(format!("{what}: provider returned {code}"))
        }
        code => ProviderError::Rejected(format!("{what}: provider returned {code}: {detail}")),
    }
}

/// Provider error bodies can be large JSON blobs; keep logs and responses short.
fn body_snippet(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let mut snippet: String = body.chars().take(LIMIT).collect();
        snippet.push_str("...");
        snippet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_statuses_classify_by_retry_eligibility() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "describe", ""),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "start", ""),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "start", ""),
            ProviderError::PermissionDenied(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "stop", "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "stop", "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "start", "oops"),
            ProviderError::Rejected(_)
        ));
    }

    #[test]
    fn instance_resource_flattens_to_description() {
        let instance = GceInstance {
            name: "acai-detector-vm".to_string(),
            status: "RUNNING".to_string(),
            machine_type: Some(
                "https://compute.googleapis.com/compute/v1/projects/p/zones/z/machineTypes/e2-medium"
                    .to_string(),
            ),
            network_interfaces: vec![GceNetworkInterface {
                network_ip: Some("10.128.0.2".to_string()),
                access_configs: vec![GceAccessConfig {
                    nat_ip: Some("203.0.113.7".to_string()),
                }],
            }],
        };

        let description = flatten_instance(instance);
        assert_eq!(description.status, InstanceStatus::Running);
        assert_eq!(description.machine_type.as_deref(), Some("e2-medium"));
        assert_eq!(description.internal_ip.as_deref(), Some("10.128.0.2"));
        assert_eq!(description.external_ip.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn instance_without_interfaces_has_no_addresses() {
        let instance = GceInstance {
            name: "vm".to_string(),
            status: "TERMINATED".to_string(),
            machine_type: None,
            network_interfaces: Vec::new(),
        };

        let description = flatten_instance(instance);
        assert_eq!(description.status, InstanceStatus::Terminated);
        assert!(description.internal_ip.is_none());
        assert!(description.external_ip.is_none());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(500);
        let snippet = body_snippet(&body);
        assert!(snippet.len() < body.len());
        assert!(snippet.ends_with("..."));
    }
}

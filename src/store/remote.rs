//! Rule store backed by the admin service's JSON API.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use super::{DomainRule, IpWhitelistEntry, RuleStore, StoreError, Tenant};

/// User-Agent header value for HTTP requests.
const USER_AGENT: &str = concat!("domainwall/", env!("CARGO_PKG_VERSION"));

/// Reads tenants, rules and whitelists over HTTP.
///
/// Endpoints, relative to the base URL:
///
/// - `GET tenants`
/// - `GET tenants/{id}/domain-rules?status=active`
/// - `GET tenants/{id}/whitelist`
///
/// Each answers with a JSON array.
#[derive(Debug)]
pub struct RemoteStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl RemoteStore {
    /// Create a remote store for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] if the URL cannot be parsed, or
    /// [`StoreError::ClientBuild`] if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| StoreError::InvalidUrl {
                url: base_url.to_string(),
            })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(StoreError::ClientBuild)?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidUrl {
                url: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T, StoreError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                StoreError::Timeout {
                    url: url.to_string(),
                }
            } else {
                StoreError::Network {
                    url: url.to_string(),
                    source: err,
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(StoreError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|err| StoreError::Network {
            url: url.to_string(),
            source: err,
        })?;

        serde_json::from_slice(&body).map_err(|err| StoreError::Malformed(format!("{url}: {err}")))
    }
}

impl RuleStore for RemoteStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let url = self.endpoint(&["tenants"])?;
        self.fetch(url).await
    }

    async fn list_active_domain_rules(&self, tenant_id: &str) -> Result<Vec<DomainRule>, StoreError> {
        let mut url = self.endpoint(&["tenants", tenant_id, "domain-rules"])?;
        url.query_pairs_mut().append_pair("status", "active");
        let rules: Vec<DomainRule> = self.fetch(url).await?;
        // The filter is advisory on the server side.
        Ok(rules.into_iter().filter(DomainRule::is_active).collect())
    }

    async fn list_whitelisted_ips(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<IpWhitelistEntry>, StoreError> {
        let url = self.endpoint(&["tenants", tenant_id, "whitelist"])?;
        self.fetch(url).await
    }
}

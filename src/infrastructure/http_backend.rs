//! reqwest client for the policy backend: template catalog, option lookups,
//! template combination and policy persistence.

use super::{
    AttributeOptionProvider, CombinationService, InfraError, PolicyRepository, RepoResult,
    TemplateCatalog,
};
use crate::domain::attribute::{AttributeOption, OptionSource};
use crate::domain::policy::{PolicyPayload, PolicyRecord};
use crate::domain::template::{CombinationRequest, CombinationResponse, PolicyTemplate};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{error, instrument};

#[derive(Clone)]
pub struct HttpPolicyBackend {
    base_url: String,
    http_client: Client,
}

impl HttpPolicyBackend {
    pub fn new(base_url: &str, timeout: Duration) -> RepoResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `policies/{id}` with the id encoded as a single path segment.
    fn policy_url(&self, policy_id: &str) -> RepoResult<Url> {
        if matches!(policy_id.trim(), "" | "." | "..") {
            return Err(InfraError::NotFound(format!("policy {policy_id}")));
        }
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| InfraError::Other(format!("invalid policy API base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| InfraError::Other(format!("policy API base URL cannot hold a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["policies", policy_id]);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> RepoResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Policy backend request failed");
            return Err(InfraError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn option_path(source: OptionSource) -> &'static str {
    match source {
        OptionSource::Departments => "departments",
        OptionSource::Positions => "positions",
        OptionSource::SystemLevels => "system-levels",
        OptionSource::Roles => "roles",
        OptionSource::Users => "users",
    }
}

#[async_trait]
impl TemplateCatalog for HttpPolicyBackend {
    #[instrument(skip(self))]
    async fn list_templates(&self, action_code: Option<&str>) -> RepoResult<Vec<PolicyTemplate>> {
        let mut request = self.http_client.get(self.url("policy-templates"));
        if let Some(code) = action_code {
            request = request.query(&[("action_code", code)]);
        }
        Self::decode(request.send().await?).await
    }
}

#[async_trait]
impl AttributeOptionProvider for HttpPolicyBackend {
    #[instrument(skip(self))]
    async fn list_options(&self, source: OptionSource) -> RepoResult<Vec<AttributeOption>> {
        let response = self
            .http_client
            .get(self.url(&format!("options/{}", option_path(source))))
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl CombinationService for HttpPolicyBackend {
    #[instrument(skip(self, request), fields(templates = ?request.template_ids))]
    async fn combine(&self, request: &CombinationRequest) -> RepoResult<CombinationResponse> {
        let response = self
            .http_client
            .post(self.url("policy-templates/combine"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl PolicyRepository for HttpPolicyBackend {
    #[instrument(skip(self))]
    async fn get_policy(&self, policy_id: &str) -> RepoResult<Option<PolicyRecord>> {
        let response = self
            .http_client
            .get(self.policy_url(policy_id)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }

    #[instrument(skip(self, payload), fields(name = %payload.name))]
    async fn create_policy(&self, payload: &PolicyPayload) -> RepoResult<PolicyRecord> {
        let response = self
            .http_client
            .post(self.url("policies"))
            .json(payload)
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self, payload), fields(name = %payload.name))]
    async fn update_policy(&self, policy_id: &str, payload: &PolicyPayload) -> RepoResult<PolicyRecord> {
        let response = self
            .http_client
            .put(self.policy_url(policy_id)?)
            .json(payload)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(InfraError::NotFound(format!("policy {policy_id}")));
        }
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let backend = HttpPolicyBackend::new("http://policy.local/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.url("policies"), "http://policy.local/api/policies");
    }

    #[test]
    fn test_policy_id_stays_one_path_segment() {
        let backend = HttpPolicyBackend::new("http://policy.local/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.policy_url("p-1").unwrap().as_str(),
            "http://policy.local/api/policies/p-1"
        );
        assert_eq!(
            backend.policy_url("../admin/p?x=1").unwrap().as_str(),
            "http://policy.local/api/policies/..%2Fadmin%2Fp%3Fx=1"
        );
        assert!(matches!(backend.policy_url(".."), Err(InfraError::NotFound(_))));
    }

    #[test]
    fn test_option_paths() {
        assert_eq!(option_path(OptionSource::SystemLevels), "system-levels");
        assert_eq!(option_path(OptionSource::Departments), "departments");
    }
}

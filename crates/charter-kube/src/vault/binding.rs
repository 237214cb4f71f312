//! Open Service Broker bindings
//!
//! A binding vault provisions a service instance at a broker, waits for
//! asynchronous provisioning to finish and stores the binding credentials.
//! Deleting the vault unbinds and deprovisions again.

use charter_core::BindingSpec;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use uuid::Uuid;

use super::VaultData;
use crate::error::{KubeError, Result};

pub(crate) const CREDENTIALS_KEY: &str = "credentials";
const INSTANCE_ID_KEY: &str = "instance-id";
const BINDING_ID_KEY: &str = "binding-id";
const SERVICE_ID_KEY: &str = "service-id";
const PLAN_ID_KEY: &str = "plan-id";

const API_VERSION_HEADER: &str = "X-Broker-API-Version";
const API_VERSION: &str = "2.14";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    services: Vec<Service>,
}

#[derive(Debug, Deserialize)]
struct Service {
    id: String,
    name: String,
    #[serde(default)]
    plans: Vec<Plan>,
}

#[derive(Debug, Deserialize)]
struct Plan {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct AsyncResponse {
    #[serde(default)]
    operation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LastOperation {
    state: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BindResponse {
    #[serde(default)]
    credentials: JsonValue,
}

/// Outcome of a call that may complete asynchronously
enum Completion {
    Done,
    Pending(Option<String>),
}

/// Minimal Open Service Broker v2 client
#[derive(Debug, Clone)]
pub struct BrokerClient {
    client: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl BrokerClient {
    pub fn new(url: &str, username: Option<String>, password: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| KubeError::executor("create broker client", e))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.url, path))
            .header(API_VERSION_HEADER, API_VERSION);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }
        request
    }

    async fn send(&self, action: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| KubeError::executor(action, e))?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::GONE {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(KubeError::executor(
            action,
            format!("broker returned {}: {}", status.as_u16(), body.trim()),
        ))
    }

    async fn catalog(&self) -> Result<Catalog> {
        let response = self
            .send("read broker catalog", self.request(reqwest::Method::GET, "/v2/catalog"))
            .await?;
        response
            .json()
            .await
            .map_err(|e| KubeError::executor("read broker catalog", e))
    }

    async fn provision(
        &self,
        instance_id: &str,
        service_id: &str,
        plan_id: &str,
        parameters: &JsonValue,
    ) -> Result<Completion> {
        let body = json!({
            "service_id": service_id,
            "plan_id": plan_id,
            "organization_guid": Uuid::new_v4().to_string(),
            "space_guid": Uuid::new_v4().to_string(),
            "parameters": parameters,
        });
        let request = self
            .request(
                reqwest::Method::PUT,
                &format!("/v2/service_instances/{instance_id}"),
            )
            .query(&[("accepts_incomplete", "true")])
            .json(&body);
        completion(self.send("provision service instance", request).await?).await
    }

    async fn deprovision(&self, instance_id: &str, service_id: &str, plan_id: &str) -> Result<Completion> {
        let request = self
            .request(
                reqwest::Method::DELETE,
                &format!("/v2/service_instances/{instance_id}"),
            )
            .query(&[
                ("service_id", service_id),
                ("plan_id", plan_id),
                ("accepts_incomplete", "true"),
            ]);
        completion(self.send("deprovision service instance", request).await?).await
    }

    async fn last_operation(
        &self,
        instance_id: &str,
        service_id: &str,
        plan_id: &str,
        operation: Option<&str>,
    ) -> Result<(LastOperation, Option<Duration>)> {
        let mut query = vec![("service_id", service_id), ("plan_id", plan_id)];
        if let Some(operation) = operation {
            query.push(("operation", operation));
        }
        let request = self
            .request(
                reqwest::Method::GET,
                &format!("/v2/service_instances/{instance_id}/last_operation"),
            )
            .query(&query);
        let response = self.send("poll last operation", request).await?;
        if response.status() == reqwest::StatusCode::GONE {
            // Deprovisioning finished and the instance is gone
            return Ok((
                LastOperation {
                    state: "succeeded".to_string(),
                    description: None,
                },
                None,
            ));
        }
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs);
        let last = response
            .json()
            .await
            .map_err(|e| KubeError::executor("poll last operation", e))?;
        Ok((last, retry_after))
    }

    async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        service_id: &str,
        plan_id: &str,
    ) -> Result<JsonValue> {
        let request = self
            .request(
                reqwest::Method::PUT,
                &format!("/v2/service_instances/{instance_id}/service_bindings/{binding_id}"),
            )
            .json(&json!({
                "service_id": service_id,
                "plan_id": plan_id,
            }));
        let response: BindResponse = self
            .send("bind service instance", request)
            .await?
            .json()
            .await
            .map_err(|e| KubeError::executor("bind service instance", e))?;
        Ok(response.credentials)
    }

    async fn unbind(&self, instance_id: &str, binding_id: &str, service_id: &str, plan_id: &str) -> Result<()> {
        let request = self
            .request(
                reqwest::Method::DELETE,
                &format!("/v2/service_instances/{instance_id}/service_bindings/{binding_id}"),
            )
            .query(&[("service_id", service_id), ("plan_id", plan_id)]);
        self.send("unbind service instance", request).await?;
        Ok(())
    }
}

async fn completion(response: reqwest::Response) -> Result<Completion> {
    if response.status() == reqwest::StatusCode::ACCEPTED {
        let body: AsyncResponse = response.json().await.unwrap_or_default();
        Ok(Completion::Pending(body.operation))
    } else {
        Ok(Completion::Done)
    }
}

/// Binding backend
pub struct BindingBackend {
    client: BrokerClient,
    service: String,
    plan: String,
    parameters: JsonValue,
    poll_interval: Duration,
}

impl BindingBackend {
    pub fn from_spec(vault: &str, spec: &BindingSpec) -> Result<Self> {
        let client = BrokerClient::new(&spec.url, spec.username.clone(), spec.password.clone())
            .map_err(|e| KubeError::backend(vault, e))?;
        Ok(Self {
            client,
            service: spec.service.clone(),
            plan: spec.plan.clone(),
            parameters: spec.parameters.clone(),
            poll_interval: spec
                .poll_interval
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs),
        })
    }

    pub(crate) async fn apply(&self, vault: &str, current: VaultData) -> Result<VaultData> {
        if current.contains_key(CREDENTIALS_KEY) {
            return Ok(current);
        }
        self.provision_and_bind(current)
            .await
            .map_err(|e| KubeError::backend(vault, e))
    }

    async fn provision_and_bind(&self, mut data: VaultData) -> Result<VaultData> {
        let catalog = self.client.catalog().await?;
        let service = catalog
            .services
            .iter()
            .find(|s| s.name == self.service)
            .ok_or_else(|| {
                KubeError::executor("select service", format!("service '{}' not found", self.service))
            })?;
        let plan = service
            .plans
            .iter()
            .find(|p| p.name == self.plan)
            .ok_or_else(|| {
                KubeError::executor(
                    "select plan",
                    format!("plan '{}' not found for service '{}'", self.plan, self.service),
                )
            })?;

        let instance_id = Uuid::new_v4().to_string();
        tracing::info!(service = %service.name, plan = %plan.name, instance = %instance_id, "provisioning service instance");
        if let Completion::Pending(operation) = self
            .client
            .provision(&instance_id, &service.id, &plan.id, &self.parameters)
            .await?
        {
            self.wait(&instance_id, &service.id, &plan.id, operation.as_deref(), "provisioning")
                .await?;
        }

        let binding_id = Uuid::new_v4().to_string();
        let credentials = self
            .client
            .bind(&instance_id, &binding_id, &service.id, &plan.id)
            .await?;

        data.insert(INSTANCE_ID_KEY.to_string(), instance_id.into_bytes());
        data.insert(BINDING_ID_KEY.to_string(), binding_id.into_bytes());
        data.insert(SERVICE_ID_KEY.to_string(), service.id.clone().into_bytes());
        data.insert(PLAN_ID_KEY.to_string(), plan.id.clone().into_bytes());
        data.insert(CREDENTIALS_KEY.to_string(), serde_json::to_vec(&credentials)?);
        Ok(data)
    }

    async fn wait(
        &self,
        instance_id: &str,
        service_id: &str,
        plan_id: &str,
        operation: Option<&str>,
        what: &str,
    ) -> Result<()> {
        loop {
            let (last, retry_after) = self
                .client
                .last_operation(instance_id, service_id, plan_id, operation)
                .await?;
            match last.state.as_str() {
                "succeeded" => return Ok(()),
                "failed" => {
                    return Err(KubeError::executor(
                        what,
                        format!(
                            "service '{}' with plan '{}' failed{}",
                            self.service,
                            self.plan,
                            last.description
                                .map(|d| format!(": {d}"))
                                .unwrap_or_default()
                        ),
                    ));
                }
                _ => {
                    tracing::debug!(instance = instance_id, state = %last.state, "waiting for broker");
                    tokio::time::sleep(retry_after.unwrap_or(self.poll_interval)).await;
                }
            }
        }
    }

    /// Placeholder credentials
    pub(crate) fn template(&self) -> VaultData {
        let mut data = VaultData::new();
        data.insert(CREDENTIALS_KEY.to_string(), b"{}".to_vec());
        data
    }

    pub(crate) async fn delete(&self, vault: &str, data: &VaultData) -> Result<()> {
        let field = |key: &str| {
            data.get(key)
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .filter(|v| !v.is_empty())
        };
        let (Some(instance_id), Some(binding_id), Some(service_id), Some(plan_id)) = (
            field(INSTANCE_ID_KEY),
            field(BINDING_ID_KEY),
            field(SERVICE_ID_KEY),
            field(PLAN_ID_KEY),
        ) else {
            return Err(KubeError::backend(vault, "missing binding configuration"));
        };

        let result = async {
            self.client
                .unbind(&instance_id, &binding_id, &service_id, &plan_id)
                .await?;
            if let Completion::Pending(operation) = self
                .client
                .deprovision(&instance_id, &service_id, &plan_id)
                .await?
            {
                self.wait(&instance_id, &service_id, &plan_id, operation.as_deref(), "deprovisioning")
                    .await?;
            }
            Ok::<(), KubeError>(())
        }
        .await;
        result.map_err(|e| KubeError::backend(vault, e))
    }
}

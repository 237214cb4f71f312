//! Vaults: lazily materialized secrets
//!
//! A [`Vault`] owns one cluster secret. Its data is produced by a backend
//! the first time anything needs it and is persisted as part of the
//! owning chart's objects.
//!
//! ## State machine
//!
//! ```text
//! Init --read--> Loaded --ensure--> Ready
//!   \____________ensure____________/
//! ```
//!
//! - `read` fetches the existing secret; a missing secret is not an error.
//! - `ensure` runs the backend once. From `Loaded` the backend must keep
//!   every existing key unchanged; from `Init` placeholder data is used
//!   when the backend can produce it.
//! - `Ready` is final. A failed `ensure` leaves state and data untouched.

mod binding;
mod certificate;
mod credential;
mod prompt;

pub use binding::BindingBackend;
pub use certificate::{CertificateBackend, Validity};
pub use credential::CredentialBackend;
pub use prompt::{NoPrompter, PromptBackend, PromptRequest, Prompter, StaticPrompter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use charter_core::{BackendSpec, Object, VaultSpec};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{KubeError, Result};
use crate::executor::{ClusterExecutor, ExecOptions};

/// Raw secret data
pub type VaultData = BTreeMap<String, Vec<u8>>;

/// Lifecycle state of a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Init,
    Loaded,
    Ready,
}

/// How an attribute is exposed to templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Text,
    Json,
}

/// The closed set of secret generators
pub enum VaultBackend {
    RandomCredential(CredentialBackend),
    X509Certificate(CertificateBackend),
    ServiceBrokerBinding(BindingBackend),
    InteractivePrompt(PromptBackend),
}

impl VaultBackend {
    /// Backend name used in messages
    pub fn kind(&self) -> &'static str {
        match self {
            VaultBackend::RandomCredential(_) => "credential",
            VaultBackend::X509Certificate(_) => "certificate",
            VaultBackend::ServiceBrokerBinding(_) => "binding",
            VaultBackend::InteractivePrompt(_) => "prompt",
        }
    }

    /// Attribute name, data key and conversion of every exposed value
    fn attributes(&self) -> &'static [(&'static str, &'static str, Conversion)] {
        match self {
            VaultBackend::RandomCredential(_) => &[
                ("username", credential::USERNAME_KEY, Conversion::Text),
                ("password", credential::PASSWORD_KEY, Conversion::Text),
            ],
            VaultBackend::X509Certificate(_) => &[
                ("certificate", certificate::CERTIFICATE_KEY, Conversion::Text),
                ("private_key", certificate::PRIVATE_KEY_KEY, Conversion::Text),
                ("ca", certificate::CA_KEY, Conversion::Text),
            ],
            VaultBackend::ServiceBrokerBinding(_) => {
                &[("credentials", binding::CREDENTIALS_KEY, Conversion::Json)]
            }
            VaultBackend::InteractivePrompt(_) => {
                &[("value", prompt::VALUE_KEY, Conversion::Text)]
            }
        }
    }

    /// Produce the next data from the current data
    async fn apply(&self, vault: &str, current: VaultData) -> Result<VaultData> {
        match self {
            VaultBackend::RandomCredential(b) => Ok(b.apply(current)),
            VaultBackend::X509Certificate(b) => b.apply(vault, current).await,
            VaultBackend::ServiceBrokerBinding(b) => b.apply(vault, current).await,
            VaultBackend::InteractivePrompt(b) => b.apply(vault, current),
        }
    }

    /// Placeholder data for rendering without a cluster
    fn template(&self) -> Option<VaultData> {
        match self {
            VaultBackend::ServiceBrokerBinding(b) => Some(b.template()),
            VaultBackend::InteractivePrompt(b) => b.template(),
            VaultBackend::RandomCredential(_) | VaultBackend::X509Certificate(_) => None,
        }
    }

    /// Release external resources provisioned for `data`
    async fn delete(&self, vault: &str, data: &VaultData) -> Result<()> {
        match self {
            VaultBackend::ServiceBrokerBinding(b) => b.delete(vault, data).await,
            _ => Ok(()),
        }
    }

    /// Whether `delete` does anything
    fn has_external_resources(&self) -> bool {
        matches!(self, VaultBackend::ServiceBrokerBinding(_))
    }

    fn signer(&self) -> Option<&Vault> {
        match self {
            VaultBackend::X509Certificate(b) => b.signer(),
            _ => None,
        }
    }
}

struct Inner {
    state: VaultState,
    data: VaultData,
}

/// Handle to a vault; clones share state
#[derive(Clone)]
pub struct Vault {
    name: String,
    backend: Arc<VaultBackend>,
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("name", &self.name)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl Vault {
    pub fn new(name: impl Into<String>, backend: VaultBackend) -> Self {
        Self {
            name: name.into(),
            backend: Arc::new(backend),
            inner: Arc::new(Mutex::new(Inner {
                state: VaultState::Init,
                data: VaultData::new(),
            })),
        }
    }

    /// Build a vault from its declaration
    ///
    /// Certificate signers are looked up among `declared`, which holds the
    /// vaults declared before this one.
    pub fn from_spec(
        spec: &VaultSpec,
        declared: &IndexMap<String, Vault>,
        prompter: Arc<dyn Prompter>,
    ) -> Result<Self> {
        let backend = match &spec.backend {
            BackendSpec::Credential(c) => {
                VaultBackend::RandomCredential(CredentialBackend::from_spec(c))
            }
            BackendSpec::Certificate(c) => {
                let signer = match &c.signer {
                    Some(name) => Some(declared.get(name).cloned().ok_or_else(|| {
                        KubeError::backend(&spec.name, format!("unknown signer '{name}'"))
                    })?),
                    None => None,
                };
                VaultBackend::X509Certificate(CertificateBackend::from_spec(
                    &spec.name, c, signer,
                )?)
            }
            BackendSpec::Binding(b) => {
                VaultBackend::ServiceBrokerBinding(BindingBackend::from_spec(&spec.name, b)?)
            }
            BackendSpec::Prompt(p) => {
                VaultBackend::InteractivePrompt(PromptBackend::from_spec(p, prompter))
            }
        };
        Ok(Self::new(&spec.name, backend))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &VaultBackend {
        &self.backend
    }

    pub async fn state(&self) -> VaultState {
        self.inner.lock().await.state
    }

    /// Snapshot of the current data
    pub async fn data(&self) -> VaultData {
        self.inner.lock().await.data.clone()
    }

    /// Load the persisted secret, if any
    pub async fn read(&self, executor: &dyn ClusterExecutor, opts: &ExecOptions) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != VaultState::Init {
            return Ok(());
        }
        match executor.get("Secret", &self.name, opts).await {
            Ok(object) => inner.data = decode_secret_data(&object)?,
            Err(e) if e.is_not_found() => {
                tracing::debug!(vault = %self.name, "no persisted secret");
            }
            Err(e) => return Err(e),
        }
        inner.state = VaultState::Loaded;
        Ok(())
    }

    /// Materialize the data; runs the backend at most once
    pub fn ensure(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(signer) = self.backend.signer() {
                signer.ensure().await?;
            }

            let mut inner = self.inner.lock().await;
            let next = match inner.state {
                VaultState::Ready => return Ok(()),
                VaultState::Loaded => {
                    let current = inner.data.clone();
                    let next = self.backend.apply(&self.name, current).await?;
                    self.check_preserved(&inner.data, &next)?;
                    next
                }
                VaultState::Init => match self.backend.template() {
                    Some(placeholder) => placeholder,
                    None => self.backend.apply(&self.name, VaultData::new()).await?,
                },
            };
            inner.data = next;
            inner.state = VaultState::Ready;
            tracing::debug!(vault = %self.name, backend = self.backend.kind(), "vault ready");
            Ok(())
        })
    }

    fn check_preserved(&self, current: &VaultData, next: &VaultData) -> Result<()> {
        for (key, value) in current {
            if next.get(key) != Some(value) {
                return Err(KubeError::backend(
                    &self.name,
                    format!("existing key '{key}' would change"),
                ));
            }
        }
        Ok(())
    }

    /// Value of one attribute, materializing the vault first
    pub async fn attribute(&self, attribute: &str) -> Result<JsonValue> {
        let (_, key, conversion) = self
            .backend
            .attributes()
            .iter()
            .find(|(name, _, _)| *name == attribute)
            .ok_or_else(|| {
                KubeError::backend(
                    &self.name,
                    format!("{} has no attribute '{attribute}'", self.backend.kind()),
                )
            })?;
        self.ensure().await?;
        let inner = self.inner.lock().await;
        convert(&self.name, inner.data.get(*key), *conversion)
    }

    /// Every attribute plus `name`, for rendering
    pub async fn template_values(&self) -> Result<JsonValue> {
        self.ensure().await?;
        let inner = self.inner.lock().await;
        self.values_of(&inner.data)
    }

    /// The secret persisting this vault
    pub async fn object(&self, namespace: &str) -> Result<Object> {
        self.ensure().await?;
        let inner = self.inner.lock().await;
        let data: Map<String, JsonValue> = inner
            .data
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(STANDARD.encode(v))))
            .collect();
        Ok(Object::new("v1", "Secret", &self.name)
            .with_namespace(namespace)
            .with_field("type", json!("Opaque"))
            .with_field("data", JsonValue::Object(data)))
    }

    /// Attributes of the data read so far, without running the backend
    ///
    /// Missing attributes are null.
    pub async fn current_values(&self) -> Result<JsonValue> {
        let inner = self.inner.lock().await;
        self.values_of(&inner.data)
    }

    fn values_of(&self, data: &VaultData) -> Result<JsonValue> {
        let mut values = Map::new();
        values.insert("name".to_string(), json!(self.name));
        for (attribute, key, conversion) in self.backend.attributes() {
            values.insert(
                attribute.to_string(),
                convert(&self.name, data.get(*key), *conversion)?,
            );
        }
        Ok(JsonValue::Object(values))
    }

    /// Reference to the persisting secret, enough to delete it
    pub fn secret_ref(&self, namespace: &str) -> Object {
        Object::new("v1", "Secret", &self.name).with_namespace(namespace)
    }

    /// Release resources the backend provisioned outside the cluster
    ///
    /// Works on the data loaded by `read`; nothing was provisioned when
    /// there is none.
    pub async fn release(&self) -> Result<()> {
        if !self.backend.has_external_resources() {
            return Ok(());
        }
        let data = self.inner.lock().await.data.clone();
        if data.is_empty() {
            tracing::debug!(vault = %self.name, "nothing to release");
            return Ok(());
        }
        self.backend.delete(&self.name, &data).await
    }
}

fn convert(vault: &str, data: Option<&Vec<u8>>, conversion: Conversion) -> Result<JsonValue> {
    let Some(bytes) = data else {
        return Ok(JsonValue::Null);
    };
    match conversion {
        Conversion::Text => Ok(JsonValue::String(String::from_utf8_lossy(bytes).into_owned())),
        Conversion::Json => serde_json::from_slice(bytes)
            .map_err(|e| KubeError::backend(vault, format!("invalid JSON data: {e}"))),
    }
}

/// Decode the base64 `data` map of a secret
pub fn decode_secret_data(object: &Object) -> Result<VaultData> {
    let mut data = VaultData::new();
    if let Some(JsonValue::Object(map)) = object.additional.get("data") {
        for (key, value) in map {
            let encoded = value.as_str().unwrap_or_default();
            data.insert(key.clone(), STANDARD.decode(encoded)?);
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InMemoryExecutor;
    use charter_core::{CredentialSpec, PromptSpec, Settings};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPrompter(AtomicUsize);

    impl Prompter for CountingPrompter {
        fn ask(&self, _request: &PromptRequest<'_>) -> std::io::Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("answer-{n}"))
        }
    }

    fn executor() -> InMemoryExecutor {
        InMemoryExecutor::new(Arc::new(Settings::default()), "default")
    }

    fn prompt_vault(prompter: Arc<CountingPrompter>) -> Vault {
        Vault::new(
            "region",
            VaultBackend::InteractivePrompt(PromptBackend::from_spec(
                &PromptSpec::default(),
                prompter,
            )),
        )
    }

    fn credential_vault(username: Option<&str>) -> Vault {
        Vault::new(
            "db-admin",
            VaultBackend::RandomCredential(CredentialBackend::from_spec(&CredentialSpec {
                username: username.map(String::from),
                password: None,
            })),
        )
    }

    #[tokio::test]
    async fn test_ready_runs_backend_once() {
        let prompter = Arc::new(CountingPrompter(AtomicUsize::new(0)));
        let vault = prompt_vault(prompter.clone());
        vault.read(&executor(), &ExecOptions::default()).await.unwrap();
        assert_eq!(vault.state().await, VaultState::Loaded);

        vault.ensure().await.unwrap();
        vault.ensure().await.unwrap();
        assert_eq!(vault.attribute("value").await.unwrap(), "answer-0");

        assert_eq!(prompter.0.load(Ordering::SeqCst), 1);
        assert_eq!(vault.state().await, VaultState::Ready);
    }

    #[tokio::test]
    async fn test_read_missing_secret_is_loaded_and_empty() {
        let vault = credential_vault(None);
        vault.read(&executor(), &ExecOptions::default()).await.unwrap();
        assert_eq!(vault.state().await, VaultState::Loaded);
        assert!(vault.data().await.is_empty());
    }

    #[tokio::test]
    async fn test_existing_data_is_preserved() {
        let exec = executor();
        let first = credential_vault(None);
        first.read(&exec, &ExecOptions::default()).await.unwrap();
        let secret = first.object("default").await.unwrap();
        exec.insert(secret);

        let second = credential_vault(None);
        second.read(&exec, &ExecOptions::default()).await.unwrap();
        second.ensure().await.unwrap();
        assert_eq!(first.data().await, second.data().await);
    }

    #[tokio::test]
    async fn test_overwrite_fails_and_keeps_state() {
        let exec = executor();
        let mut data = VaultData::new();
        data.insert("username".into(), b"alice".to_vec());
        data.insert("password".into(), b"pw".to_vec());
        let stored = Vault::new("db-admin", VaultBackend::RandomCredential(CredentialBackend::default()));
        {
            let mut inner = stored.inner.lock().await;
            inner.data = data.clone();
            inner.state = VaultState::Loaded;
        }
        exec.insert(stored.object("default").await.unwrap());

        let vault = credential_vault(Some("bob"));
        vault.read(&exec, &ExecOptions::default()).await.unwrap();
        let err = vault.ensure().await.unwrap_err();
        assert!(matches!(err, KubeError::Backend { .. }));
        assert_eq!(vault.state().await, VaultState::Loaded);
        assert_eq!(vault.data().await, data);
    }

    #[tokio::test]
    async fn test_secret_object_and_template_values() {
        let vault = credential_vault(Some("admin"));
        let object = vault.object("shop").await.unwrap();
        assert_eq!(object.kind, "Secret");
        assert_eq!(object.namespace(), "shop");
        assert_eq!(object.additional["type"], "Opaque");
        assert_eq!(object.additional["data"]["username"], "YWRtaW4=");

        let values = vault.template_values().await.unwrap();
        assert_eq!(values["name"], "db-admin");
        assert_eq!(values["username"], "admin");
        assert_eq!(values["password"].as_str().unwrap().len(), 24);

        assert!(vault.attribute("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_release_without_external_resources_is_noop() {
        let vault = credential_vault(None);
        vault.ensure().await.unwrap();
        vault.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_current_values_do_not_materialize() {
        let vault = credential_vault(None);
        let values = vault.current_values().await.unwrap();
        assert_eq!(values["name"], "db-admin");
        assert!(values["password"].is_null());
        assert_eq!(vault.state().await, VaultState::Init);
        assert_eq!(vault.secret_ref("shop").namespace(), "shop");
    }
}

//! Values asked from the operator

use charter_core::PromptSpec;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::VaultData;
use crate::error::{KubeError, Result};

pub(crate) const VALUE_KEY: &str = "value";

/// What to ask
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub vault: &'a str,
    pub description: Option<&'a str>,
    pub secret: bool,
    pub default: Option<&'a str>,
    pub options: &'a [String],
}

/// Asks the operator for a value
pub trait Prompter: Send + Sync {
    fn ask(&self, request: &PromptRequest<'_>) -> std::io::Result<String>;
}

/// Answers with the default, fails without one
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompter;

impl Prompter for NoPrompter {
    fn ask(&self, request: &PromptRequest<'_>) -> std::io::Result<String> {
        request.default.map(str::to_string).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("no terminal to ask for '{}'", request.vault),
            )
        })
    }
}

/// Fixed answers keyed by vault name, falling back to defaults
#[derive(Debug, Default, Clone)]
pub struct StaticPrompter {
    answers: BTreeMap<String, String>,
}

impl StaticPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn answer(mut self, vault: impl Into<String>, value: impl Into<String>) -> Self {
        self.answers.insert(vault.into(), value.into());
        self
    }
}

impl Prompter for StaticPrompter {
    fn ask(&self, request: &PromptRequest<'_>) -> std::io::Result<String> {
        match self.answers.get(request.vault) {
            Some(answer) => Ok(answer.clone()),
            None => NoPrompter.ask(request),
        }
    }
}

/// Prompt backend
pub struct PromptBackend {
    description: Option<String>,
    secret: bool,
    default: Option<String>,
    options: Vec<String>,
    prompter: Arc<dyn Prompter>,
}

impl PromptBackend {
    pub fn from_spec(spec: &PromptSpec, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            description: spec.description.clone(),
            secret: spec.secret,
            default: spec.default.clone(),
            options: spec.options.clone(),
            prompter,
        }
    }

    /// Ask only when no value is stored yet
    pub(crate) fn apply(&self, vault: &str, mut data: VaultData) -> Result<VaultData> {
        if data.get(VALUE_KEY).is_some_and(|v| !v.is_empty()) {
            return Ok(data);
        }

        let request = PromptRequest {
            vault,
            description: self.description.as_deref(),
            secret: self.secret,
            default: self.default.as_deref(),
            options: &self.options,
        };
        let answer = self
            .prompter
            .ask(&request)
            .map_err(|e| KubeError::backend(vault, e))?;

        if !self.options.is_empty() && !self.options.contains(&answer) {
            return Err(KubeError::backend(
                vault,
                format!("'{answer}' is not one of {}", self.options.join(", ")),
            ));
        }

        data.insert(VALUE_KEY.to_string(), answer.into_bytes());
        Ok(data)
    }

    /// The default, when there is one
    pub(crate) fn template(&self) -> Option<VaultData> {
        self.default.as_ref().map(|default| {
            let mut data = VaultData::new();
            data.insert(VALUE_KEY.to_string(), default.clone().into_bytes());
            data
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(spec: PromptSpec, prompter: impl Prompter + 'static) -> PromptBackend {
        PromptBackend::from_spec(&spec, Arc::new(prompter))
    }

    #[test]
    fn test_static_answer() {
        let b = backend(
            PromptSpec::default(),
            StaticPrompter::new().answer("region", "eu"),
        );
        let data = b.apply("region", VaultData::new()).unwrap();
        assert_eq!(data[VALUE_KEY], b"eu");
    }

    #[test]
    fn test_existing_value_not_asked() {
        let b = backend(PromptSpec::default(), NoPrompter);
        let mut current = VaultData::new();
        current.insert(VALUE_KEY.into(), b"us".to_vec());
        assert_eq!(b.apply("region", current.clone()).unwrap(), current);
    }

    #[test]
    fn test_no_prompter_uses_default_or_fails() {
        let with_default = backend(
            PromptSpec {
                default: Some("eu".into()),
                ..Default::default()
            },
            NoPrompter,
        );
        assert_eq!(with_default.apply("region", VaultData::new()).unwrap()[VALUE_KEY], b"eu");
        assert_eq!(with_default.template().unwrap()[VALUE_KEY], b"eu");

        let without = backend(PromptSpec::default(), NoPrompter);
        assert!(without.apply("region", VaultData::new()).is_err());
        assert!(without.template().is_none());
    }

    #[test]
    fn test_answer_must_be_an_option() {
        let b = backend(
            PromptSpec {
                options: vec!["yes".into(), "no".into()],
                ..Default::default()
            },
            StaticPrompter::new().answer("confirm", "maybe"),
        );
        let err = b.apply("confirm", VaultData::new()).unwrap_err();
        assert!(err.to_string().contains("not one of yes, no"));
    }
}

//! Username/password generator

use charter_core::CredentialSpec;
use rand::Rng;
use rand::distr::Alphanumeric;

use super::VaultData;

pub(crate) const USERNAME_KEY: &str = "username";
pub(crate) const PASSWORD_KEY: &str = "password";

const GENERATED_LENGTH: usize = 24;

/// Fills in a random username and password
///
/// Configured values always win; a configured value that differs from the
/// persisted one is therefore rejected by the vault.
#[derive(Debug, Clone, Default)]
pub struct CredentialBackend {
    username: Option<String>,
    password: Option<String>,
}

impl CredentialBackend {
    pub fn from_spec(spec: &CredentialSpec) -> Self {
        Self {
            username: spec.username.clone(),
            password: spec.password.clone(),
        }
    }

    pub(crate) fn apply(&self, mut data: VaultData) -> VaultData {
        fill(&mut data, USERNAME_KEY, self.username.as_deref());
        fill(&mut data, PASSWORD_KEY, self.password.as_deref());
        data
    }
}

fn fill(data: &mut VaultData, key: &str, configured: Option<&str>) {
    match configured {
        Some(value) => {
            data.insert(key.to_string(), value.as_bytes().to_vec());
        }
        None => {
            data.entry(key.to_string())
                .or_insert_with(|| random_string(GENERATED_LENGTH).into_bytes());
        }
    }
}

fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_missing_values() {
        let data = CredentialBackend::default().apply(VaultData::new());
        assert_eq!(data[USERNAME_KEY].len(), 24);
        assert_eq!(data[PASSWORD_KEY].len(), 24);
        assert!(data[PASSWORD_KEY].iter().all(u8::is_ascii_alphanumeric));
        assert_ne!(data[USERNAME_KEY], data[PASSWORD_KEY]);
    }

    #[test]
    fn test_keeps_existing_values() {
        let mut current = VaultData::new();
        current.insert(PASSWORD_KEY.into(), b"kept".to_vec());
        let data = CredentialBackend::default().apply(current);
        assert_eq!(data[PASSWORD_KEY], b"kept");
        assert_eq!(data[USERNAME_KEY].len(), 24);
    }

    #[test]
    fn test_configured_values() {
        let backend = CredentialBackend::from_spec(&CredentialSpec {
            username: Some("admin".into()),
            password: None,
        });
        let data = backend.apply(VaultData::new());
        assert_eq!(data[USERNAME_KEY], b"admin");
    }
}

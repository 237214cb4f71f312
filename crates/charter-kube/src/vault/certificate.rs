//! X.509 certificate generator
//!
//! Produces either a self-signed certificate (CAs, or leaves without a
//! signer) or a leaf signed by the CA held in another vault. Existing
//! certificates are never reissued.

use chrono::{Datelike, Days, Months, NaiveDate, Utc};
use charter_core::CertificateSpec;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};

use super::{Vault, VaultData};
use crate::error::{KubeError, Result};

pub(crate) const CERTIFICATE_KEY: &str = "tls.crt";
pub(crate) const PRIVATE_KEY_KEY: &str = "tls.key";
pub(crate) const CA_KEY: &str = "ca.crt";

/// ISO-8601 period such as `P3M`, `P1Y` or `P1Y2M10D`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Validity {
    pub years: u32,
    pub months: u32,
    pub days: u32,
}

impl Validity {
    pub fn parse(period: &str) -> Option<Self> {
        let body = period.strip_prefix('P')?;
        if body.is_empty() {
            return None;
        }

        let mut validity = Validity::default();
        let mut number = String::new();
        for c in body.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let n: u32 = number.parse().ok()?;
            number.clear();
            match c {
                'Y' => validity.years = validity.years.checked_add(n)?,
                'M' => validity.months = validity.months.checked_add(n)?,
                'W' => validity.days = validity.days.checked_add(n.checked_mul(7)?)?,
                'D' => validity.days = validity.days.checked_add(n)?,
                _ => return None,
            }
        }
        number.is_empty().then_some(validity)
    }

    /// Last day of validity when starting on `start`
    pub fn end_from(&self, start: NaiveDate) -> Option<NaiveDate> {
        start
            .checked_add_months(Months::new(
                self.years.checked_mul(12)?.checked_add(self.months)?,
            ))?
            .checked_add_days(Days::new(u64::from(self.days)))
    }
}

/// Certificate backend
pub struct CertificateBackend {
    domains: Vec<String>,
    validity: Validity,
    is_ca: bool,
    signer: Option<Vault>,
}

impl CertificateBackend {
    pub fn from_spec(vault: &str, spec: &CertificateSpec, signer: Option<Vault>) -> Result<Self> {
        let validity = Validity::parse(&spec.validity).ok_or_else(|| {
            KubeError::backend(vault, format!("invalid validity '{}'", spec.validity))
        })?;
        Ok(Self {
            domains: spec.domains.clone(),
            validity,
            is_ca: spec.is_ca,
            signer,
        })
    }

    pub(crate) fn signer(&self) -> Option<&Vault> {
        self.signer.as_ref()
    }

    pub(crate) async fn apply(&self, vault: &str, current: VaultData) -> Result<VaultData> {
        if current.contains_key(CERTIFICATE_KEY) {
            return Ok(current);
        }
        let fail = |e: rcgen::Error| KubeError::backend(vault, e);

        if !self.is_ca && self.domains.is_empty() {
            return Err(KubeError::backend(vault, "no domains given for certificate"));
        }

        let issuer = match (&self.signer, self.is_ca) {
            (Some(signer), false) => Some((signer.name().to_string(), signer.data().await)),
            _ => None,
        };

        let params = self.params(vault)?;
        let key = KeyPair::generate().map_err(fail)?;

        let mut next = current;
        match issuer {
            Some((signer, issuer_data)) => {
                let (Some(issuer_cert), Some(issuer_key)) = (
                    pem_text(&issuer_data, CERTIFICATE_KEY),
                    pem_text(&issuer_data, PRIVATE_KEY_KEY),
                ) else {
                    return Err(KubeError::backend(
                        vault,
                        format!("signer '{signer}' holds no certificate"),
                    ));
                };

                let issuer_key = KeyPair::from_pem(issuer_key).map_err(fail)?;
                let issuer = CertificateParams::from_ca_cert_pem(issuer_cert)
                    .and_then(|p| p.self_signed(&issuer_key))
                    .map_err(fail)?;
                let cert = params.signed_by(&key, &issuer, &issuer_key).map_err(fail)?;

                next.insert(CERTIFICATE_KEY.to_string(), cert.pem().into_bytes());
                next.insert(CA_KEY.to_string(), issuer_cert.as_bytes().to_vec());
            }
            None => {
                let cert = params.self_signed(&key).map_err(fail)?;
                let pem = cert.pem();
                if !self.is_ca {
                    next.insert(CA_KEY.to_string(), pem.clone().into_bytes());
                }
                next.insert(CERTIFICATE_KEY.to_string(), pem.into_bytes());
            }
        }
        next.insert(PRIVATE_KEY_KEY.to_string(), key.serialize_pem().into_bytes());
        tracing::debug!(vault, ca = self.is_ca, "issued certificate");
        Ok(next)
    }

    fn params(&self, vault: &str) -> Result<CertificateParams> {
        let mut params = CertificateParams::new(self.domains.clone())
            .map_err(|e| KubeError::backend(vault, e))?;

        let common_name = self.domains.first().map_or(vault, String::as_str);
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);

        let today = Utc::now().date_naive();
        let end = self
            .validity
            .end_from(today)
            .ok_or_else(|| KubeError::backend(vault, "validity out of range"))?;
        let (year, month, day) = ymd(today);
        params.not_before = rcgen::date_time_ymd(year, month, day);
        let (year, month, day) = ymd(end);
        params.not_after = rcgen::date_time_ymd(year, month, day);

        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        if self.is_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ];
        } else {
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
        }
        Ok(params)
    }
}

fn ymd(date: NaiveDate) -> (i32, u8, u8) {
    // Month and day always fit into u8
    (date.year(), date.month() as u8, date.day() as u8)
}

fn pem_text<'a>(data: &'a VaultData, key: &str) -> Option<&'a str> {
    data.get(key).and_then(|v| std::str::from_utf8(v).ok())
}

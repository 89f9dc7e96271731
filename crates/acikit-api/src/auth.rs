// Credentials and certificate-based request signing.
//
// Password auth posts name + pwd to `aaaLogin` and rides on the returned
// token. Certificate auth signs every request with the user's private key;
// the controller verifies it against the certificate registered under
// `uni/userext/user-<login>/usercert-<cert_name>`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::SignatureScheme;
use rustls::sign::SigningKey;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::pem::PemObject;
use secrecy::SecretString;

use crate::error::Error;

/// Which authentication strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Token obtained from `aaaLogin` with name + password.
    Password,
    /// Per-request RSA-SHA256 signature.
    Certificate,
}

/// Credentials for authenticating with the controller.
#[derive(Debug, Clone)]
pub enum Credentials {
    Password {
        login: String,
        password: SecretString,
    },
    Certificate {
        login: String,
        cert_name: String,
        signer: Arc<RequestSigner>,
    },
}

impl Credentials {
    pub fn password(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            login: login.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn certificate(
        login: impl Into<String>,
        cert_name: impl Into<String>,
        signer: RequestSigner,
    ) -> Self {
        Self::Certificate {
            login: login.into(),
            cert_name: cert_name.into(),
            signer: Arc::new(signer),
        }
    }

    pub fn login(&self) -> &str {
        match self {
            Self::Password { login, .. } | Self::Certificate { login, .. } => login,
        }
    }

    pub fn strategy(&self) -> AuthStrategy {
        match self {
            Self::Password { .. } => AuthStrategy::Password,
            Self::Certificate { .. } => AuthStrategy::Certificate,
        }
    }

    /// Cookie header value for a signed request, or `None` for password auth.
    pub fn signature_cookie(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<&str>,
    ) -> Result<Option<String>, Error> {
        let Self::Certificate {
            login,
            cert_name,
            signer,
        } = self
        else {
            return Ok(None);
        };

        let payload = format!("{method}{path_and_query}{}", body.unwrap_or(""));
        let signature = signer.sign(payload.as_bytes())?;
        Ok(Some(format!(
            "APIC-Certificate-Algorithm=v1.0; \
             APIC-Certificate-DN=uni/userext/user-{login}/usercert-{cert_name}; \
             APIC-Certificate-Fingerprint=fingerprint; \
             APIC-Request-Signature={signature}"
        )))
    }
}

/// RSA private key producing base64 RSA-SHA256 (PKCS#1 v1.5) signatures.
pub struct RequestSigner {
    key: Arc<dyn SigningKey>,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("algorithm", &self.key.algorithm())
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Load a PKCS#1 or PKCS#8 PEM private key.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        let der = PrivateKeyDer::from_pem_slice(pem)
            .map_err(|e| Error::Signature(format!("invalid private key PEM: {e}")))?;
        let key = rustls::crypto::ring::sign::any_supported_type(&der)
            .map_err(|e| Error::Signature(format!("unsupported private key: {e}")))?;
        if key
            .choose_scheme(&[SignatureScheme::RSA_PKCS1_SHA256])
            .is_none()
        {
            return Err(Error::Signature(
                "private key cannot produce RSA-SHA256 signatures".into(),
            ));
        }
        Ok(Self { key })
    }

    pub fn from_pem_file(path: &Path) -> Result<Self, Error> {
        let pem = std::fs::read(path).map_err(|e| {
            Error::Signature(format!("failed to read key {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    /// Sign `payload` and return the base64 signature.
    pub fn sign(&self, payload: &[u8]) -> Result<String, Error> {
        let signer = self
            .key
            .choose_scheme(&[SignatureScheme::RSA_PKCS1_SHA256])
            .ok_or_else(|| Error::Signature("RSA-SHA256 not available".into()))?;
        let raw = signer
            .sign(payload)
            .map_err(|e| Error::Signature(e.to_string()))?;
        Ok(STANDARD.encode(raw))
    }
}

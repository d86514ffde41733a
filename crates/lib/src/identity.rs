//! User identity: device keypair, principal derivation, and the identity-provider login flow.
//!
//! The device keypair is persisted locally (e.g. `~/.parley/device.json`). The principal is
//! derived from the public key and confirmed by the identity service on login; the backend
//! uses it as the durable user key.

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

const DEFAULT_PROVIDER_URL: &str = "http://127.0.0.1:8944";

/// How many digest bytes make up the principal text (hex-encoded).
const PRINCIPAL_LEN: usize = 20;

/// Opaque per-user identity handle. Text form is the truncated SHA-256 digest of the
/// device public key, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Derive the principal for a raw ed25519 public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut text = String::with_capacity(PRINCIPAL_LEN * 2);
        for b in digest.iter().take(PRINCIPAL_LEN) {
            text.push_str(&format!("{:02x}", b));
        }
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity request failed: {0}")]
    Request(String),
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("device key error: {0}")]
    Key(String),
}

/// Persisted device identity (public key, private key). Stored at e.g. ~/.parley/device.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub public_key: String,
    pub private_key: String,
}

/// Build the canonical payload string the identity service expects for signature
/// verification. Order: principal, public key, signed_at, newline-separated.
pub fn build_login_payload(principal: &Principal, public_key: &str, signed_at: u64) -> String {
    format!("{}\n{}\n{}", principal, public_key, signed_at)
}

impl DeviceIdentity {
    /// Sign the payload string and return the signature as base64.
    pub fn sign(&self, payload: &str) -> Result<String, IdentityError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(self.private_key.as_bytes())
            .map_err(|e| IdentityError::Key(format!("decode private key: {}", e)))?;
        let key_arr: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::Key("invalid private key length".to_string()))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&key_arr);
        let sig = signing_key.sign(payload.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()))
    }

    /// Principal derived from this device's public key.
    pub fn principal(&self) -> Result<Principal, IdentityError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(self.public_key.as_bytes())
            .map_err(|e| IdentityError::Key(format!("decode public key: {}", e)))?;
        Ok(Principal::from_public_key(&key_bytes))
    }

    /// Load from JSON file. Returns None if file missing or invalid.
    pub fn load(path: &Path) -> Option<Self> {
        let s = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&s).ok()
    }

    /// Save to JSON file. Creates parent dirs if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let s = serde_json::to_string_pretty(self).map_err(|e| anyhow::anyhow!("{}", e))?;
        std::fs::write(path, s)?;
        Ok(())
    }

    /// Generate a new keypair.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("getrandom: {}", e))?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        let verifying_key = signing_key.verifying_key();
        let public_key = base64::engine::general_purpose::STANDARD.encode(verifying_key.as_bytes());
        let private_key = base64::engine::general_purpose::STANDARD.encode(signing_key.as_bytes());
        Ok(Self {
            public_key,
            private_key,
        })
    }

    /// Load from `path`, generating and saving a fresh keypair when missing.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if let Some(identity) = Self::load(path) {
            return Ok(identity);
        }
        let identity = Self::generate()?;
        identity.save(path)?;
        log::info!("generated device identity at {}", path.display());
        Ok(identity)
    }
}

/// Granted identity after a successful login.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub principal: Principal,
}

/// Interactive identity-provider flow: exchanges a signed device challenge for a principal.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Run the login flow for the given device. Failure leaves the caller's session unchanged.
    async fn login(&self, device: &DeviceIdentity) -> Result<AuthGrant, IdentityError>;

    /// Invalidate the provider-side session for the principal.
    async fn logout(&self, principal: &Principal) -> Result<(), IdentityError>;
}

/// HTTP identity provider: POST /authorize with a signed payload, POST /logout to end.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    provider_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    principal: String,
}

impl HttpIdentityProvider {
    pub fn new(provider_url: Option<String>) -> Self {
        let provider_url = provider_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());
        Self {
            provider_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn login(&self, device: &DeviceIdentity) -> Result<AuthGrant, IdentityError> {
        let principal = device.principal()?;
        let signed_at = chrono::Utc::now().timestamp_millis() as u64;
        let payload = build_login_payload(&principal, &device.public_key, signed_at);
        let signature = device.sign(&payload)?;

        let url = format!("{}/authorize", self.provider_url);
        let body = serde_json::json!({
            "principal": principal.as_str(),
            "publicKey": device.public_key,
            "signedAt": signed_at,
            "signature": signature,
        });
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(IdentityError::Provider(format!("{} {}", status, body)));
        }
        let grant: AuthorizeResponse = res
            .json()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;
        log::info!("logged in as {}", grant.principal);
        Ok(AuthGrant {
            principal: Principal::from_text(grant.principal),
        })
    }

    async fn logout(&self, principal: &Principal) -> Result<(), IdentityError> {
        let url = format!("{}/logout", self.provider_url);
        let body = serde_json::json!({ "principal": principal.as_str() });
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(IdentityError::Provider(format!("{} {}", status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn principal_derivation_is_deterministic() {
        let key = [7u8; 32];
        let a = Principal::from_public_key(&key);
        let b = Principal::from_public_key(&key);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), PRINCIPAL_LEN * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_keys_give_different_principals() {
        let a = Principal::from_public_key(&[1u8; 32]);
        let b = Principal::from_public_key(&[2u8; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn signature_verifies_against_public_key() {
        let device = DeviceIdentity::generate().expect("generate keypair");
        let principal = device.principal().expect("derive principal");
        let payload = build_login_payload(&principal, &device.public_key, 1_700_000_000_000);
        let sig_b64 = device.sign(&payload).expect("sign payload");

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(device.public_key.as_bytes())
            .expect("decode public key");
        let key_arr: [u8; 32] = key_bytes.as_slice().try_into().expect("key length");
        let verifying_key =
            ed25519_dalek::VerifyingKey::from_bytes(&key_arr).expect("verifying key");
        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(sig_b64.as_bytes())
            .expect("decode signature");
        let sig_arr: [u8; 64] = sig_bytes.as_slice().try_into().expect("signature length");
        let sig = ed25519_dalek::Signature::from_bytes(&sig_arr);
        assert!(verifying_key.verify(payload.as_bytes(), &sig).is_ok());
    }

    #[test]
    fn login_payload_is_newline_separated() {
        let principal = Principal::from_text("abc123");
        let payload = build_login_payload(&principal, "PUBKEY", 42);
        assert_eq!(payload, "abc123\nPUBKEY\n42");
    }
}

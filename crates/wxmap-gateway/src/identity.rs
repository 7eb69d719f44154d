//! Ephemeral client identity: a fresh 32-byte secret per process start.
//! Never persisted, never reused across restarts.

use std::fmt;

use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

/// Length of the client secret in bytes.
pub const SECRET_LEN: usize = 32;

/// Number of digest bytes shown in the fingerprint.
const FINGERPRINT_LEN: usize = 8;

/// Secret used to authenticate the pub/sub client.
///
/// Neither `Clone` nor `Serialize`; one instance per process, held by the
/// gateway handle.
pub struct ClientIdentity {
    secret: [u8; SECRET_LEN],
    fingerprint: String,
}

impl ClientIdentity {
    /// Draw a new secret from the operating system RNG.
    pub fn generate() -> Result<Self, GatewayError> {
        let mut secret = [0u8; SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| GatewayError::Identity(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: [u8; SECRET_LEN]) -> Self {
        let digest = Sha256::digest(secret);
        let fingerprint = hex::encode(&digest[..FINGERPRINT_LEN]);
        Self {
            secret,
            fingerprint,
        }
    }

    /// Keyed SHA-256 digest of `message` under the secret, hex-encoded.
    ///
    /// Lets a broker that was told the fingerprint check that later
    /// requests come from the same process without the secret leaving it.
    pub fn sign(&self, message: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(message);
        hex::encode(hasher.finalize())
    }

    #[cfg(test)]
    fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }

    /// Short public tag derived from the secret; safe to log.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("fingerprint", &self.fingerprint)
            .field("secret", &"<redacted>")
            .finish()
    }
}

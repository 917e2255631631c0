//! Loading the non-modified visual representation.
//!
//! The authority asks for the asset a few updates after its actor is
//! created. The host fetches it in the background and hands the bytes back
//! through [`AssetRequest::complete`], which may happen after the actor is
//! gone: the request carries the actor's liveness token and attaches nothing
//! once it is cancelled.
//!
//! Identifiers are content addressed, `resdb:///<sha256 hex>.<extension>`,
//! so the payload is verified against the digest in its own name.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use sm64sync_sim::{EntityId, HostWorld, LivenessToken};
use thiserror::Error;
use tracing::{debug, warn};

/// Built-in visual representation used when none is configured.
pub const DEFAULT_MARIO_URL: &str =
    "resdb:///d85c309f7aa0c909f6b1518c4a74dacc383760c516425bec6617e8ebe8dd50da.brson";

const RESDB_SCHEME: &str = "resdb:///";
const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("`{0}` is not a resdb:///<sha256>.<ext> asset identifier")]
    Malformed(String),

    #[error("content of `{url}` hashes to {actual}")]
    DigestMismatch { url: String, actual: String },
}

// ============================================================================
// Asset Id
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetId {
    url: String,
    /// Lowercase hex SHA-256.
    digest: String,
    extension: String,
}

impl AssetId {
    pub fn parse(url: &str) -> Result<Self, AssetError> {
        let malformed = || AssetError::Malformed(url.to_string());

        let name = url.strip_prefix(RESDB_SCHEME).ok_or_else(malformed)?;
        let (digest, extension) = name.split_once('.').ok_or_else(malformed)?;
        if digest.len() != SHA256_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        if extension.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            url: url.to_string(),
            digest: digest.to_ascii_lowercase(),
            extension: extension.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Check `content` against the digest in the identifier.
    pub fn verify(&self, content: &[u8]) -> Result<(), AssetError> {
        let actual = format!("{:x}", Sha256::digest(content));
        if actual != self.digest {
            return Err(AssetError::DigestMismatch {
                url: self.url.clone(),
                actual,
            });
        }
        Ok(())
    }
}

impl FromStr for AssetId {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One outstanding asset load for one actor.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    entity: EntityId,
    asset: AssetId,
    token: LivenessToken,
}

impl AssetRequest {
    pub fn new(entity: EntityId, asset: AssetId, token: LivenessToken) -> Self {
        Self {
            entity,
            asset,
            token,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    /// The owning actor was disposed.
    pub fn is_cancelled(&self) -> bool {
        !self.token.is_alive()
    }

    /// Verify the loaded bytes and attach them to the actor's entity.
    ///
    /// Returns `Ok(false)` when the actor was disposed while the load was in
    /// flight; nothing is touched in that case.
    pub fn complete(self, content: &[u8], host: &mut dyn HostWorld) -> Result<bool, AssetError> {
        if let Err(err) = self.asset.verify(content) {
            warn!(entity = self.entity, %err, "rejecting loaded asset");
            return Err(err);
        }
        if self.is_cancelled() {
            debug!(entity = self.entity, asset = %self.asset, "asset arrived after mario was disposed");
            return Ok(false);
        }
        host.attach_visual(self.entity, content);
        Ok(true)
    }
}

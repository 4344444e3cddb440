use crate::ArtifactDescriptor;
use serde::{Deserialize, Serialize};

// Hex characters of the BLAKE3 digest appended by the fingerprint policy.
const FINGERPRINT_LEN: usize = 16;

/// How a descriptor maps to a cache key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKeyPolicy {
    /// Key on the logical name only. Descriptors sharing a name collide,
    /// which is fine as long as every export covers the same fixed region.
    #[default]
    Name,
    /// Key on the name plus a digest of region, scale, crs and image
    /// expression, so changing any parameter produces a new entry.
    Fingerprint,
}

impl CacheKeyPolicy {
    pub fn key_for(&self, descriptor: &ArtifactDescriptor) -> String {
        match self {
            CacheKeyPolicy::Name => descriptor.name().to_string(),
            CacheKeyPolicy::Fingerprint => {
                let digest = fingerprint(descriptor);
                format!("{}-{}", descriptor.name(), &digest[..FINGERPRINT_LEN])
            },
        }
    }
}

fn fingerprint(descriptor: &ArtifactDescriptor) -> String {
    let mut hasher = blake3::Hasher::new();
    descriptor.region().hash_into(&mut hasher);
    hasher.update(&descriptor.scale().to_le_bytes());
    hasher.update(descriptor.crs().as_bytes());
    // serde_json::Value keeps object keys sorted, so this is canonical.
    hasher.update(descriptor.image().to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

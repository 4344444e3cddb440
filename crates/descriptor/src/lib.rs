//! Artifact descriptors for remote raster exports.
//!
//! An [`ArtifactDescriptor`] names one export (a single computed raster) and
//! carries the parameters that determine its content: the spatial
//! [`Region`], the pixel scale in metres, the target CRS and an opaque image
//! expression that is handed to the compute provider untouched.
//!
//! Descriptors map to cache keys through a [`CacheKeyPolicy`]. The default
//! policy keys on the name alone, so two descriptors sharing a name share a
//! cache entry even if their other fields differ.

pub mod error;
mod key;
pub mod products;
mod region;

pub use crate::key::CacheKeyPolicy;
pub use crate::region::{BoundingBox, Region};
use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Default coordinate reference system (WGS84 lon/lat).
pub const DEFAULT_CRS: &str = "EPSG:4326";

/// Identifies a requested export.
///
/// Immutable once constructed; all fields are validated by
/// [`ArtifactDescriptor::new`], including when deserialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedDescriptor")]
pub struct ArtifactDescriptor {
    name: String,
    region: Region,
    scale: f64,
    crs: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    image: serde_json::Value,
}

/// Wire form of a descriptor before [`ArtifactDescriptor::new`] has seen it.
#[derive(Deserialize)]
struct UncheckedDescriptor {
    name: String,
    region: Region,
    scale: f64,
    crs: String,
    #[serde(default)]
    image: serde_json::Value,
}

impl TryFrom<UncheckedDescriptor> for ArtifactDescriptor {
    type Error = ErrorKind;

    fn try_from(raw: UncheckedDescriptor) -> std::result::Result<Self, Self::Error> {
        match Self::new(raw.name, raw.region, raw.scale, raw.crs) {
            Ok(descriptor) => Ok(descriptor.with_image(raw.image)),
            Err(err) => Err((*err).clone()),
        }
    }
}

impl ArtifactDescriptor {
    /// Create a descriptor without an image expression.
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidName`], [`ErrorKind::InvalidRegion`],
    /// [`ErrorKind::InvalidScale`] or [`ErrorKind::InvalidCrs`].
    ///
    /// # Examples
    ///
    /// ```
    /// use terracache_descriptor::{ArtifactDescriptor, BoundingBox};
    ///
    /// let bbox = BoundingBox::new(-74.9, 3.7, -71.9, 7.1);
    /// let descriptor = ArtifactDescriptor::new("NDVI_2023", bbox, 250.0, "EPSG:4326").unwrap();
    /// assert_eq!(descriptor.name(), "NDVI_2023");
    /// ```
    pub fn new(name: impl Into<String>, region: impl Into<Region>, scale: f64, crs: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidName(name));
        }
        let region = region.into();
        region.validate()?;
        if !scale.is_finite() || scale <= 0.0 {
            exn::bail!(ErrorKind::InvalidScale(scale));
        }
        let crs = crs.into();
        if crs.trim().is_empty() {
            exn::bail!(ErrorKind::InvalidCrs(crs));
        }
        Ok(Self { name, region, scale, crs, image: serde_json::Value::Null })
    }

    /// Attach the provider-specific image expression that computes the raster.
    pub fn with_image(mut self, image: serde_json::Value) -> Self {
        self.image = image;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn image(&self) -> &serde_json::Value {
        &self.image
    }

    /// Cache key for this descriptor under the given policy.
    pub fn cache_key(&self, policy: CacheKeyPolicy) -> String {
        policy.key_for(self)
    }
}

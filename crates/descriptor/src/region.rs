//! Spatial regions an export is clipped to.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box in CRS units (degrees for `EPSG:4326`).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self { west, south, east, north }
    }

    pub fn to_wsen(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

/// Region of interest, either a bounding box or a single polygon ring of
/// `[x, y]` vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Bbox(BoundingBox),
    Polygon(Vec<[f64; 2]>),
}

impl Region {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Region::Bbox(bbox) => {
                let finite = bbox.to_wsen().iter().all(|v| v.is_finite());
                if !finite || bbox.west >= bbox.east || bbox.south >= bbox.north {
                    exn::bail!(ErrorKind::InvalidRegion(format!("inverted or non-finite bbox {:?}", bbox.to_wsen())));
                }
            },
            Region::Polygon(ring) => {
                if ring.len() < 3 {
                    exn::bail!(ErrorKind::InvalidRegion(format!("polygon has {} vertices", ring.len())));
                }
                if ring.iter().flatten().any(|v| !v.is_finite()) {
                    exn::bail!(ErrorKind::InvalidRegion("polygon has non-finite vertices".to_string()));
                }
            },
        }
        Ok(())
    }

    /// Feed the region's coordinates into a hasher in a fixed order.
    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Region::Bbox(bbox) => {
                hasher.update(b"bbox");
                for v in bbox.to_wsen() {
                    hasher.update(&v.to_le_bytes());
                }
            },
            Region::Polygon(ring) => {
                hasher.update(b"polygon");
                for [x, y] in ring {
                    hasher.update(&x.to_le_bytes());
                    hasher.update(&y.to_le_bytes());
                }
            },
        }
    }
}

impl From<BoundingBox> for Region {
    fn from(bbox: BoundingBox) -> Self {
        Region::Bbox(bbox)
    }
}

//! Descriptor presets for the MODIS products compared by the NDVI/LST
//! workflow.
//!
//! The presets only describe *what* to compute; the image expression is an
//! opaque JSON document that the compute provider interprets (collection,
//! band, date window, median composite and a linear rescale).

use crate::error::{ErrorKind, Result};
use crate::{ArtifactDescriptor, BoundingBox, DEFAULT_CRS, Region};
use exn::ResultExt;
use serde_json::json;
use std::fmt::{Display, Formatter, Result as FmtResult};
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Inclusive date window used to filter the source collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: Date,
    end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Result<Self> {
        if end < start {
            exn::bail!(ErrorKind::InvalidDateRange(format!("{start} is after {end}")));
        }
        Ok(Self { start, end })
    }

    /// Parse a range from two `YYYY-MM-DD` strings.
    ///
    /// ```
    /// use terracache_descriptor::products::DateRange;
    ///
    /// let range = DateRange::parse("2023-01-01", "2023-12-31").unwrap();
    /// assert_eq!(range.to_string(), "2023-01-01_2023-12-31");
    /// assert!(DateRange::parse("2023-12-31", "2023-01-01").is_err());
    /// ```
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| Date::parse(s, ISO_DATE).or_raise(|| ErrorKind::InvalidDateRange(format!("{s:?}")));
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn start(&self) -> Date {
        self.start
    }

    pub fn end(&self) -> Date {
        self.end
    }

    fn format(date: Date) -> String {
        // Formatting a calendar date with a static description cannot fail.
        date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}_{}", Self::format(self.start), Self::format(self.end))
    }
}

/// A raster product with a fixed source collection and rescale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    /// MODIS Terra 16-day vegetation index, 250 m.
    Ndvi,
    /// MODIS Terra daily land surface temperature (day), 1 km, in °C.
    Lst,
}

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Ndvi => "NDVI",
            Product::Lst => "LST",
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Product::Ndvi => "MODIS/061/MOD13Q1",
            Product::Lst => "MODIS/061/MOD11A1",
        }
    }

    pub fn band(&self) -> &'static str {
        match self {
            Product::Ndvi => "NDVI",
            Product::Lst => "LST_Day_1km",
        }
    }

    /// Native resolution in metres.
    pub fn scale(&self) -> f64 {
        match self {
            Product::Ndvi => 250.0,
            Product::Lst => 1000.0,
        }
    }

    /// `(multiply, add)` applied to the median composite.
    pub fn rescale(&self) -> (f64, f64) {
        match self {
            Product::Ndvi => (0.0001, 0.0),
            // Kelvin * 0.02, then to Celsius
            Product::Lst => (0.02, -273.15),
        }
    }

    /// Name of the export for a date window, e.g. `NDVI_2023-01-01_2023-12-31`.
    pub fn export_name(&self, range: &DateRange) -> String {
        format!("{}_{range}", self.as_str())
    }

    /// Build the descriptor for this product over `region`.
    pub fn descriptor(&self, range: &DateRange, region: impl Into<Region>) -> Result<ArtifactDescriptor> {
        let (multiply, add) = self.rescale();
        let image = json!({
            "collection": self.collection(),
            "band": self.band(),
            "start": DateRange::format(range.start),
            "end": DateRange::format(range.end),
            "reducer": "median",
            "multiply": multiply,
            "add": add,
            "rename": self.as_str(),
        });
        Ok(ArtifactDescriptor::new(self.export_name(range), region, self.scale(), DEFAULT_CRS)?.with_image(image))
    }
}

impl Display for Product {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Cundinamarca and Boyacá (Colombia) with roughly 10 km of margin.
pub fn study_area() -> BoundingBox {
    BoundingBox::new(-74.99, 3.64, -71.85, 7.15)
}

pub fn ndvi(range: &DateRange, region: impl Into<Region>) -> Result<ArtifactDescriptor> {
    Product::Ndvi.descriptor(range, region)
}

pub fn lst(range: &DateRange, region: impl Into<Region>) -> Result<ArtifactDescriptor> {
    Product::Lst.descriptor(range, region)
}

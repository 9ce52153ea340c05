use serde_json::Value;

use crate::error::{Error, Result};

const SHAPE: &str = "expected [[minLat, maxLat], [minLon, maxLon]]";

/// Inclusive latitude/longitude box, clamped to valid coordinate ranges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self> {
        if [min_lat, max_lat, min_lon, max_lon].iter().any(|n| n.is_nan()) {
            return Err(Error::InvalidBoundingBox("coordinates must be numbers".into()));
        }
        let bbox = Self {
            min_lat: min_lat.clamp(-90.0, 90.0),
            max_lat: max_lat.clamp(-90.0, 90.0),
            min_lon: min_lon.clamp(-180.0, 180.0),
            max_lon: max_lon.clamp(-180.0, 180.0),
        };
        if bbox.min_lat > bbox.max_lat || bbox.min_lon > bbox.max_lon {
            return Err(Error::InvalidBoundingBox(
                "max cannot be smaller than min".into(),
            ));
        }
        Ok(bbox)
    }

    /// Parse the `[[minLat, maxLat], [minLon, maxLon]]` wire format.
    pub fn from_json(value: &Value) -> Result<Self> {
        let invalid = || Error::InvalidBoundingBox(SHAPE.into());
        let axes = value.as_array().filter(|a| a.len() == 2).ok_or_else(invalid)?;
        let mut nums = [0f64; 4];
        for (i, axis) in axes.iter().enumerate() {
            let pair = axis.as_array().filter(|p| p.len() == 2).ok_or_else(invalid)?;
            for (j, n) in pair.iter().enumerate() {
                nums[i * 2 + j] = n.as_f64().ok_or_else(invalid)?;
            }
        }
        Self::new(nums[0], nums[1], nums[2], nums[3])
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

impl TryFrom<[[f64; 2]; 2]> for BoundingBox {
    type Error = Error;

    fn try_from(value: [[f64; 2]; 2]) -> Result<Self> {
        Self::new(value[0][0], value[0][1], value[1][0], value[1][1])
    }
}

/// Anything a query accepts as its box; conversion errors surface as the query's error.
pub trait IntoBoundingBox {
    fn into_bbox(self) -> Result<BoundingBox>;
}

impl IntoBoundingBox for BoundingBox {
    fn into_bbox(self) -> Result<BoundingBox> {
        Ok(self)
    }
}

impl IntoBoundingBox for [[f64; 2]; 2] {
    fn into_bbox(self) -> Result<BoundingBox> {
        BoundingBox::try_from(self)
    }
}

impl IntoBoundingBox for &Value {
    fn into_bbox(self) -> Result<BoundingBox> {
        BoundingBox::from_json(self)
    }
}

impl IntoBoundingBox for Value {
    fn into_bbox(self) -> Result<BoundingBox> {
        BoundingBox::from_json(&self)
    }
}

//! Dataset-level configuration.

use serde::{Deserialize, Serialize};

use crate::calibration::DetectorGeometry;
use crate::center::CenterConfig;
use crate::error::Result;
use crate::variance::{validate_gain, VarianceConfig};

/// Everything needed to go from a pattern stack to a variance curve.
///
/// Only `geometry` is required when deserializing; the other sections fall
/// back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FemConfig {
    pub geometry: DetectorGeometry,
    #[serde(default)]
    pub center: CenterConfig,
    #[serde(default)]
    pub variance: VarianceConfig,
}

impl FemConfig {
    pub fn new(geometry: DetectorGeometry) -> Self {
        Self {
            geometry,
            center: CenterConfig::default(),
            variance: VarianceConfig::default(),
        }
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        validate_gain(self.variance.gain)
    }
}

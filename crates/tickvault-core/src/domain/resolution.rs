use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tickvault_warehouse::Dataset;

use crate::ValidationError;

/// Bar resolution (the contract calls it granularity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Resolution {
    pub const ALL: [Self; 4] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::OneHour,
        Self::OneDay,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }

    pub const fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::OneHour => 3_600,
            Self::OneDay => 86_400,
        }
    }

    /// Partition dataset holding bars of this resolution.
    pub const fn dataset(self) -> Dataset {
        match self {
            Self::OneMinute => Dataset::Bars1m,
            Self::FiveMinutes => Dataset::Bars5m,
            Self::OneHour => Dataset::Bars1h,
            Self::OneDay => Dataset::Bars1d,
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            other => Err(ValidationError::InvalidResolution {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolution_and_maps_dataset() {
        let resolution = Resolution::from_str("1D").expect("must parse");
        assert_eq!(resolution, Resolution::OneDay);
        assert_eq!(resolution.dataset(), Dataset::Bars1d);
    }

    #[test]
    fn rejects_unsupported_resolution() {
        let err = Resolution::from_str("15m").expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidResolution { .. }));
    }
}

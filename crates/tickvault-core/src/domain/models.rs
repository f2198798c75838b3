use serde::{Deserialize, Serialize};
use time::Date;
use tickvault_warehouse::{BarRecord, OptionRecord};

use crate::domain::timestamp::iso_date;
use crate::{OptionRight, Resolution, Symbol, UtcDateTime, ValidationError};

/// One OHLCV observation.
///
/// Serialized in the compact wire form `{t, o, h, l, c, v, symbol, g}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub ts: UtcDateTime,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: u64,
    pub symbol: Symbol,
    #[serde(rename = "g")]
    pub resolution: Resolution,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        resolution: Resolution,
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        let bar = Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
            symbol,
            resolution,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Check the row invariants: minute-aligned timestamp, positive finite
    /// prices and `low <= min(open, close) <= max(open, close) <= high`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.ts.is_minute_aligned() {
            return Err(ValidationError::TimestampNotMinuteAligned {
                value: self.ts.format_rfc3339(),
            });
        }
        validate_positive("open", self.open)?;
        validate_positive("high", self.high)?;
        validate_positive("low", self.low)?;
        validate_positive("close", self.close)?;

        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(ValidationError::InvalidBarBounds);
        }
        Ok(())
    }

    pub fn to_record(&self) -> BarRecord {
        BarRecord {
            ts: self.ts.unix_timestamp(),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }

    pub fn from_record(
        symbol: &Symbol,
        resolution: Resolution,
        record: &BarRecord,
    ) -> Result<Self, ValidationError> {
        Self::new(
            symbol.clone(),
            resolution,
            UtcDateTime::from_unix(record.ts)?,
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        )
    }
}

/// One option contract of a chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: Symbol,
    #[serde(with = "iso_date")]
    pub expiry: Date,
    pub right: OptionRight,
    pub strike: f64,
    pub bid: f64,
    pub ask: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vega: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<f64>,
}

/// Greeks and implied volatility attached to a contract.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Greeks {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub iv: Option<f64>,
}

impl OptionContract {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        expiry: Date,
        right: OptionRight,
        strike: f64,
        bid: f64,
        ask: f64,
        mid: Option<f64>,
        greeks: Greeks,
    ) -> Result<Self, ValidationError> {
        let contract = Self {
            symbol,
            expiry,
            right,
            strike,
            bid,
            ask,
            mid,
            delta: greeks.delta,
            gamma: greeks.gamma,
            theta: greeks.theta,
            vega: greeks.vega,
            iv: greeks.iv,
        };
        contract.validate()?;
        Ok(contract)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_positive("strike", self.strike)?;
        validate_non_negative("bid", self.bid)?;
        validate_non_negative("ask", self.ask)?;
        if self.bid > 0.0 && self.ask > 0.0 && self.bid > self.ask {
            return Err(ValidationError::BidAboveAsk {
                bid: self.bid,
                ask: self.ask,
            });
        }
        validate_optional_non_negative("mid", self.mid)?;
        if let Some(delta) = self.delta {
            validate_finite("delta", delta)?;
            if !(-1.0..=1.0).contains(&delta) {
                return Err(ValidationError::DeltaOutOfRange { value: delta });
            }
        }
        validate_optional_non_negative("gamma", self.gamma)?;
        if let Some(theta) = self.theta {
            validate_finite("theta", theta)?;
        }
        if let Some(vega) = self.vega {
            validate_finite("vega", vega)?;
        }
        validate_optional_non_negative("iv", self.iv)?;
        Ok(())
    }

    /// Chain ordering key: strike ascending, CALL before PUT.
    pub fn chain_order(&self, other: &Self) -> std::cmp::Ordering {
        self.expiry
            .cmp(&other.expiry)
            .then_with(|| self.strike.total_cmp(&other.strike))
            .then_with(|| self.right.cmp(&other.right))
    }

    pub fn to_record(&self) -> OptionRecord {
        OptionRecord {
            expiry: self.expiry,
            strike: self.strike,
            right: self.right,
            bid: self.bid,
            ask: self.ask,
            mid: self.mid,
            delta: self.delta,
            gamma: self.gamma,
            theta: self.theta,
            vega: self.vega,
            iv: self.iv,
        }
    }

    pub fn from_record(symbol: &Symbol, record: &OptionRecord) -> Result<Self, ValidationError> {
        Self::new(
            symbol.clone(),
            record.expiry,
            record.right,
            record.strike,
            record.bid,
            record.ask,
            record.mid,
            Greeks {
                delta: record.delta,
                gamma: record.gamma,
                theta: record.theta,
                vega: record.vega,
                iv: record.iv,
            },
        )
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_non_negative(field, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timestamp::parse_date;

    fn spy() -> Symbol {
        Symbol::parse("SPY").expect("valid symbol")
    }

    fn ts(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("valid timestamp")
    }

    #[test]
    fn bar_rejects_open_above_high() {
        let err = Bar::new(
            spy(),
            Resolution::OneDay,
            ts("2024-01-15T00:00:00Z"),
            480.0,
            475.0,
            470.0,
            472.0,
            100,
        )
        .expect_err("must fail");
        assert_eq!(err, ValidationError::InvalidBarBounds);
    }

    #[test]
    fn bar_rejects_zero_price() {
        let err = Bar::new(
            spy(),
            Resolution::OneDay,
            ts("2024-01-15T00:00:00Z"),
            0.0,
            475.0,
            0.0,
            472.0,
            100,
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::NonPositiveValue { field: "open" }));
    }

    #[test]
    fn bar_serializes_in_compact_wire_form() {
        let bar = Bar::new(
            spy(),
            Resolution::OneDay,
            ts("2024-01-15T00:00:00Z"),
            470.0,
            472.0,
            469.0,
            471.0,
            1_000,
        )
        .expect("valid bar");
        let json = serde_json::to_value(&bar).expect("serialize");
        assert_eq!(json["t"], "2024-01-15T00:00:00Z");
        assert_eq!(json["g"], "1d");
        assert_eq!(json["symbol"], "SPY");
        assert_eq!(json["v"], 1_000);
    }

    #[test]
    fn contract_bid_above_ask_is_rejected_only_when_both_quoted() {
        let expiry = parse_date("2024-01-19").expect("date");
        let crossed = OptionContract::new(
            spy(),
            expiry,
            OptionRight::Call,
            470.0,
            2.0,
            1.5,
            None,
            Greeks::default(),
        );
        assert!(matches!(crossed, Err(ValidationError::BidAboveAsk { .. })));

        let no_ask = OptionContract::new(
            spy(),
            expiry,
            OptionRight::Call,
            470.0,
            2.0,
            0.0,
            None,
            Greeks::default(),
        );
        assert!(no_ask.is_ok());
    }

    #[test]
    fn contract_delta_must_be_bounded() {
        let err = OptionContract::new(
            spy(),
            parse_date("2024-01-19").expect("date"),
            OptionRight::Put,
            470.0,
            1.0,
            1.1,
            None,
            Greeks {
                delta: Some(-1.2),
                ..Greeks::default()
            },
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::DeltaOutOfRange { .. }));
    }
}

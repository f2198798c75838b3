//! # Domain Models
//!
//! Canonical domain types for tickvault market data. Construction validates
//! every invariant, so a `Bar` or `OptionContract` in hand is always well
//! formed.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bar`] | OHLCV bar, minute-precision UTC timestamp |
//! | [`OptionContract`] | One contract of an option chain with optional Greeks |
//! | [`Symbol`] | Validated ticker |
//! | [`Resolution`] | Bar resolution (1m, 5m, 1h, 1d) |
//! | [`UtcDateTime`] | UTC timestamp |

mod models;
mod resolution;
mod symbol;
pub mod timestamp;

pub use models::{Bar, Greeks, OptionContract};
pub use resolution::Resolution;
pub use symbol::Symbol;
pub use timestamp::{format_date, parse_date, UtcDateTime};
pub use tickvault_warehouse::OptionRight;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;

/// Direction of the last forecast relative to the last real close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rise,
    Fall,
}

impl Trend {
    /// Strictly greater is a rise; an exact tie counts as a fall
    pub fn between(current: f64, last_forecast: f64) -> Self {
        if last_forecast > current {
            Trend::Rise
        } else {
            Trend::Fall
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Rise => write!(f, "rise"),
            Trend::Fall => write!(f, "fall"),
        }
    }
}

/// Body of a successful prediction
#[derive(Debug, Clone, Serialize)]
pub struct ForecastResponse {
    pub ticker: String,
    pub timeframe: String,
    pub interval: String,
    pub lstm_predictions: Vec<f64>,
    pub predicted_price_range: String,
    pub current_price: f64,
    pub projected_change: String,
    pub quantitative_analysis: String,
    #[serde(skip)]
    pub trend: Trend,
}

impl ForecastResponse {
    /// Derive the summary fields from a non-empty price forecast
    pub fn build(ticker: &str, timeframe: &str, interval: &str, prices: Vec<f64>, current_price: f64) -> Option<Self> {
        let last = *prices.last()?;
        let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let trend = Trend::between(current_price, last);
        let change_pct = (last / current_price - 1.0) * 100.0;

        Some(Self {
            ticker: ticker.to_string(),
            timeframe: timeframe.to_string(),
            interval: interval.to_string(),
            predicted_price_range: format!("${} - ${}", cents(min), cents(max)),
            current_price,
            projected_change: format!("{}%", cents(change_pct)),
            quantitative_analysis: format!(
                "LSTM model projects a {} to approximately ${}",
                trend,
                cents(last)
            ),
            lstm_predictions: prices,
            trend,
        })
    }

    /// Absolute move from the current price to the last forecast, to the cent
    pub fn projected_move(&self) -> Option<Decimal> {
        let last = Decimal::from_f64(*self.lstm_predictions.last()?)?;
        let current = Decimal::from_f64(self.current_price)?;
        Some((last - current).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
}

/// Two-decimal rendering; non-finite or out-of-range values print as-is
fn cents(value: f64) -> String {
    match Decimal::from_f64(value) {
        Some(d) => {
            let rounded = d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            // normalise negative zero produced by rounding tiny negatives
            let rounded = if rounded.is_zero() { dec!(0) } else { rounded };
            format!("{:.2}", rounded)
        }
        None => format!("{:.2}", value),
    }
}

//! Short/long simple-moving-average crossover. Reports a signal only; nothing is traded.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MovingAverageConfig;
use crate::error::ExecutionError;
use crate::indicators::sma;
use crate::sources::KlineSource;
use crate::structured_logging::EventSink;
use crate::types::{Phase, Signal, StrategyReport};
use crate::wallet::Wallet;

use super::Strategy;

pub fn crossover(short_sma: f64, long_sma: f64) -> Signal {
    match short_sma.partial_cmp(&long_sma) {
        Some(std::cmp::Ordering::Greater) => Signal::Buy,
        Some(std::cmp::Ordering::Less) => Signal::Sell,
        _ => Signal::Hold,
    }
}

#[derive(Debug)]
pub struct MovingAverageStrategy {
    config: MovingAverageConfig,
    klines: Arc<dyn KlineSource>,
    sink: Arc<dyn EventSink>,
}

impl MovingAverageStrategy {
    pub fn new(
        config: MovingAverageConfig,
        klines: Arc<dyn KlineSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            klines,
            sink,
        }
    }
}

#[async_trait]
impl Strategy for MovingAverageStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, _wallet: &Wallet) -> Result<StrategyReport, ExecutionError> {
        let c = &self.config;
        self.sink.phase(&c.name, Phase::Selecting);

        let bars = self
            .klines
            .klines(&c.symbol, &c.interval, c.long_window)
            .await?;
        let closes: Vec<f64> = bars.iter().map(|k| k.close).collect();
        let (short_sma, long_sma) = sma(&closes, c.short_window)
            .zip(sma(&closes, c.long_window))
            .ok_or_else(|| {
                ExecutionError::DataUnavailable(format!(
                    "{}: {} bars for a {}-bar window",
                    c.symbol,
                    closes.len(),
                    c.long_window
                ))
            })?;

        let signal = crossover(short_sma, long_sma);
        self.sink.progress(
            &c.name,
            &format!("{} {:?}: sma{}={short_sma:.4} sma{}={long_sma:.4}", c.symbol, signal, c.short_window, c.long_window),
        );

        Ok(StrategyReport::Signal {
            signal,
            short_sma,
            long_sma,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, StaticKlines};

    fn strategy(klines: StaticKlines, short: usize, long: usize) -> MovingAverageStrategy {
        MovingAverageStrategy::new(
            MovingAverageConfig {
                name: "ma".into(),
                symbol: "ETH".into(),
                interval: "1h".into(),
                short_window: short,
                long_window: long,
            },
            Arc::new(klines),
            Arc::new(RecordingSink::default()),
        )
    }

    #[tokio::test]
    async fn rising_series_is_a_buy() {
        let closes = (1..=10).map(|v| v as f64).collect();
        let report = strategy(StaticKlines::new(closes), 3, 5)
            .execute(&Wallet::generate())
            .await
            .unwrap();
        assert_eq!(
            report,
            StrategyReport::Signal {
                signal: Signal::Buy,
                short_sma: 9.0,
                long_sma: 8.0,
            }
        );
    }

    #[tokio::test]
    async fn falling_and_flat_series() {
        let falling = (1..=10).rev().map(|v| v as f64).collect();
        let report = strategy(StaticKlines::new(falling), 3, 5)
            .execute(&Wallet::generate())
            .await
            .unwrap();
        assert!(matches!(report, StrategyReport::Signal { signal: Signal::Sell, .. }));

        let report = strategy(StaticKlines::new(vec![3.0; 10]), 3, 5)
            .execute(&Wallet::generate())
            .await
            .unwrap();
        assert!(matches!(report, StrategyReport::Signal { signal: Signal::Hold, .. }));
    }

    #[tokio::test]
    async fn short_history_and_source_errors() {
        let err = strategy(StaticKlines::new(vec![1.0, 2.0]), 3, 5)
            .execute(&Wallet::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");

        let err = strategy(StaticKlines::failing(), 3, 5)
            .execute(&Wallet::generate())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

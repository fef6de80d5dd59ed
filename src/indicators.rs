//! Price-series statistics and concentrated-liquidity tick math.

/// Bounds of the tick space, `log_1.0001` of the min/max sqrt-price squared.
pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Population standard deviation of the last `period` values.
pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    let mean = sma(values, period)?;
    let window = &values[values.len() - period..];
    let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Some(var.sqrt())
}

/// Tick spacing fixed by each Uniswap v3 fee tier (fee in hundredths of a bip).
pub fn tick_spacing(fee: u32) -> Option<i32> {
    match fee {
        100 => Some(1),
        500 => Some(10),
        3_000 => Some(60),
        10_000 => Some(200),
        _ => None,
    }
}

/// Largest tick whose price does not exceed `price` (raw token1/token0 units).
pub fn price_to_tick(price: f64) -> i32 {
    if !(price.is_finite() && price > 0.0) {
        return MIN_TICK;
    }
    let tick = (price.ln() / 1.0001f64.ln()).floor();
    tick.clamp(MIN_TICK as f64, MAX_TICK as f64) as i32
}

pub fn align_down(tick: i32, spacing: i32) -> i32 {
    tick.div_euclid(spacing) * spacing
}

pub fn align_up(tick: i32, spacing: i32) -> i32 {
    let down = align_down(tick, spacing);
    if down == tick {
        tick
    } else {
        down + spacing
    }
}

/// Widest usable range for `spacing`.
pub fn full_range(spacing: i32) -> (i32, i32) {
    (align_up(MIN_TICK, spacing), align_down(MAX_TICK, spacing))
}

/// How a human-readable price maps onto the pool's token order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTokens {
    pub decimals0: u8,
    pub decimals1: u8,
    /// True when the quoted price is "token0 in units of token1"; false when it is the inverse.
    pub price_is_token0_in_token1: bool,
}

impl PoolTokens {
    /// Convert a quoted price into the pool's raw token1-per-token0 price.
    pub fn raw_price(&self, quoted: f64) -> f64 {
        let scale = 10f64.powi(self.decimals1 as i32 - self.decimals0 as i32);
        if self.price_is_token0_in_token1 {
            quoted * scale
        } else {
            scale / quoted
        }
    }
}

/// Range of `last_close ± k·sigma`, converted to spacing-aligned ticks. Falls back to the
/// full range when the lower bound is not a positive price.
pub fn tick_range(last_close: f64, sigma: f64, k: f64, spacing: i32, tokens: PoolTokens) -> (i32, i32) {
    let (full_lower, full_upper) = full_range(spacing);
    let low = last_close - k * sigma;
    let high = last_close + k * sigma;
    if !(low > 0.0 && high.is_finite()) {
        return (full_lower, full_upper);
    }

    let (raw_a, raw_b) = (tokens.raw_price(low), tokens.raw_price(high));
    let (raw_low, raw_high) = if raw_a <= raw_b { (raw_a, raw_b) } else { (raw_b, raw_a) };

    let lower = align_down(price_to_tick(raw_low), spacing).max(full_lower);
    let mut upper = align_up(price_to_tick(raw_high), spacing).min(full_upper);
    if upper <= lower {
        upper = (lower + spacing).min(full_upper);
    }
    (lower, upper)
}

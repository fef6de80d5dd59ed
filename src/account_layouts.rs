//! Fixed-offset decoders for on-chain account data.
//!
//! Notes:
//! - Lending reserves use the Solend `Reserve` v1 layout (619 bytes).
//! - Oracle accounts use the Pyth v2 price account layout; only the aggregate price is read.
//! - Decoding is pure; callers attach the account address to any error.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub const RESERVE_LEN: usize = 619;
pub const RESERVE_VERSION: u8 = 1;

const WAD: f64 = 1e18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{layout}: expected {expected} bytes, got {got}")]
    Length {
        layout: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{layout}: unsupported version {version}")]
    Version { layout: &'static str, version: u32 },
    #[error("{layout}: bad magic {magic:#x}")]
    Magic { layout: &'static str, magic: u32 },
    #[error("{layout}: {reason}")]
    Malformed {
        layout: &'static str,
        reason: String,
    },
}

/// Little-endian cursor over a borrowed buffer. Bounds are checked by the caller.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn u128(&mut self) -> u128 {
        u128::from_le_bytes(self.take())
    }

    fn pubkey(&mut self) -> Pubkey {
        Pubkey::new_from_array(self.take())
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReserveConfig {
    pub optimal_utilization_rate: u8,
    pub loan_to_value_ratio: u8,
    pub liquidation_bonus: u8,
    pub liquidation_threshold: u8,
    pub min_borrow_rate: u8,
    pub optimal_borrow_rate: u8,
    pub max_borrow_rate: u8,
    pub borrow_fee_wad: u64,
    pub flash_loan_fee_wad: u64,
    pub host_fee_percentage: u8,
    pub deposit_limit: u64,
    pub borrow_limit: u64,
    pub fee_receiver: Pubkey,
    pub protocol_liquidation_fee: u8,
    pub protocol_take_rate: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reserve {
    pub version: u8,
    pub last_update_slot: u64,
    pub stale: bool,
    pub lending_market: Pubkey,
    pub liquidity_mint: Pubkey,
    pub liquidity_mint_decimals: u8,
    pub liquidity_supply: Pubkey,
    pub pyth_oracle: Pubkey,
    pub switchboard_oracle: Pubkey,
    pub available_amount: u64,
    pub borrowed_amount_wads: u128,
    pub cumulative_borrow_rate_wads: u128,
    /// Quote price of one whole liquidity token, WAD-scaled.
    pub market_price: u128,
    pub collateral_mint: Pubkey,
    pub collateral_mint_total_supply: u64,
    pub collateral_supply: Pubkey,
    pub config: ReserveConfig,
}

impl Reserve {
    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        if data.len() != RESERVE_LEN {
            return Err(LayoutError::Length {
                layout: "reserve",
                expected: RESERVE_LEN,
                got: data.len(),
            });
        }
        let mut r = Reader::at(data, 0);
        let version = r.u8();
        if version != RESERVE_VERSION {
            return Err(LayoutError::Version {
                layout: "reserve",
                version: version as u32,
            });
        }
        let last_update_slot = r.u64();
        let stale = r.bool();
        let lending_market = r.pubkey();
        let liquidity_mint = r.pubkey();
        let liquidity_mint_decimals = r.u8();
        let liquidity_supply = r.pubkey();
        let pyth_oracle = r.pubkey();
        let switchboard_oracle = r.pubkey();
        let available_amount = r.u64();
        let borrowed_amount_wads = r.u128();
        let cumulative_borrow_rate_wads = r.u128();
        let market_price = r.u128();
        let collateral_mint = r.pubkey();
        let collateral_mint_total_supply = r.u64();
        let collateral_supply = r.pubkey();

        let config = ReserveConfig {
            optimal_utilization_rate: r.u8(),
            loan_to_value_ratio: r.u8(),
            liquidation_bonus: r.u8(),
            liquidation_threshold: r.u8(),
            min_borrow_rate: r.u8(),
            optimal_borrow_rate: r.u8(),
            max_borrow_rate: r.u8(),
            borrow_fee_wad: r.u64(),
            flash_loan_fee_wad: r.u64(),
            host_fee_percentage: r.u8(),
            deposit_limit: r.u64(),
            borrow_limit: r.u64(),
            fee_receiver: r.pubkey(),
            protocol_liquidation_fee: r.u8(),
            protocol_take_rate: r.u8(),
        };
        if config.optimal_utilization_rate > 100 || config.protocol_take_rate > 100 {
            return Err(LayoutError::Malformed {
                layout: "reserve",
                reason: "percentage field above 100".to_string(),
            });
        }

        Ok(Self {
            version,
            last_update_slot,
            stale,
            lending_market,
            liquidity_mint,
            liquidity_mint_decimals,
            liquidity_supply,
            pyth_oracle,
            switchboard_oracle,
            available_amount,
            borrowed_amount_wads,
            cumulative_borrow_rate_wads,
            market_price,
            collateral_mint,
            collateral_mint_total_supply,
            collateral_supply,
            config,
        })
    }

    /// Borrowed share of total liquidity, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        let borrowed = self.borrowed_amount_wads as f64 / WAD;
        let total = self.available_amount as f64 + borrowed;
        if total <= 0.0 {
            return 0.0;
        }
        (borrowed / total).clamp(0.0, 1.0)
    }

    /// Annual borrow rate in percent from the two-slope utilization curve.
    pub fn borrow_rate(&self) -> f64 {
        let c = &self.config;
        let util = self.utilization();
        let optimal_util = c.optimal_utilization_rate as f64 / 100.0;
        let (min, opt, max) = (
            c.min_borrow_rate as f64,
            c.optimal_borrow_rate as f64,
            c.max_borrow_rate as f64,
        );

        if optimal_util >= 1.0 || util < optimal_util {
            if optimal_util <= 0.0 {
                return opt;
            }
            let normalized = (util / optimal_util).min(1.0);
            normalized * (opt - min) + min
        } else {
            let normalized = (util - optimal_util) / (1.0 - optimal_util);
            normalized * (max - opt) + opt
        }
    }

    /// Annual supply rate in percent: what borrowers pay, spread over all depositors,
    /// minus the protocol's take.
    pub fn supply_apy(&self) -> f64 {
        let take = self.config.protocol_take_rate as f64 / 100.0;
        self.borrow_rate() * self.utilization() * (1.0 - take)
    }

    pub fn available_liquidity_usd(&self) -> f64 {
        let whole = self.available_amount as f64 / 10f64.powi(self.liquidity_mint_decimals as i32);
        whole * (self.market_price as f64 / WAD)
    }
}

pub const PYTH_MAGIC: u32 = 0xa1b2c3d4;
pub const PYTH_VERSION: u32 = 2;
const PYTH_PRICE_ACCOUNT_TYPE: u32 = 3;
pub const PYTH_MIN_LEN: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceStatus {
    Unknown,
    Trading,
    Halted,
    Auction,
    Ignored,
}

impl From<u32> for PriceStatus {
    fn from(v: u32) -> Self {
        match v {
            1 => PriceStatus::Trading,
            2 => PriceStatus::Halted,
            3 => PriceStatus::Auction,
            4 => PriceStatus::Ignored,
            _ => PriceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceAccount {
    pub exponent: i32,
    pub valid_slot: u64,
    pub price: i64,
    pub confidence: u64,
    pub status: PriceStatus,
    pub publish_slot: u64,
}

impl PriceAccount {
    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        if data.len() < PYTH_MIN_LEN {
            return Err(LayoutError::Length {
                layout: "pyth_price",
                expected: PYTH_MIN_LEN,
                got: data.len(),
            });
        }
        let mut r = Reader::at(data, 0);
        let magic = r.u32();
        if magic != PYTH_MAGIC {
            return Err(LayoutError::Magic {
                layout: "pyth_price",
                magic,
            });
        }
        let version = r.u32();
        if version != PYTH_VERSION {
            return Err(LayoutError::Version {
                layout: "pyth_price",
                version,
            });
        }
        let account_type = r.u32();
        if account_type != PYTH_PRICE_ACCOUNT_TYPE {
            return Err(LayoutError::Malformed {
                layout: "pyth_price",
                reason: format!("account type {account_type} is not a price account"),
            });
        }

        let mut r = Reader::at(data, 20);
        let exponent = r.i32();
        r.skip(16);
        let valid_slot = r.u64();

        let mut r = Reader::at(data, 208);
        let price = r.i64();
        let confidence = r.u64();
        let status = PriceStatus::from(r.u32());
        r.skip(4);
        let publish_slot = r.u64();

        Ok(Self {
            exponent,
            valid_slot,
            price,
            confidence,
            status,
            publish_slot,
        })
    }

    pub fn price_f64(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.exponent)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) struct ReserveFixture {
        pub lending_market: Pubkey,
        pub liquidity_mint: Pubkey,
        pub decimals: u8,
        pub pyth_oracle: Pubkey,
        pub available: u64,
        pub borrowed: u64,
        pub market_price_usd: u64,
        pub collateral_mint: Pubkey,
        pub optimal_util: u8,
        pub min_rate: u8,
        pub optimal_rate: u8,
        pub max_rate: u8,
        pub take_rate: u8,
    }

    impl Default for ReserveFixture {
        fn default() -> Self {
            Self {
                lending_market: Pubkey::new_from_array([1; 32]),
                liquidity_mint: Pubkey::new_from_array([2; 32]),
                decimals: 6,
                pyth_oracle: Pubkey::new_from_array([3; 32]),
                available: 500_000_000,
                borrowed: 500_000_000,
                market_price_usd: 1,
                collateral_mint: Pubkey::new_from_array([4; 32]),
                optimal_util: 80,
                min_rate: 0,
                optimal_rate: 8,
                max_rate: 100,
                take_rate: 0,
            }
        }
    }

    pub(crate) fn encode_reserve(f: &ReserveFixture) -> Vec<u8> {
        let mut d = vec![0u8; RESERVE_LEN];
        d[0] = RESERVE_VERSION;
        d[10..42].copy_from_slice(f.lending_market.as_ref());
        d[42..74].copy_from_slice(f.liquidity_mint.as_ref());
        d[74] = f.decimals;
        d[75..107].copy_from_slice(Pubkey::new_from_array([5; 32]).as_ref());
        d[107..139].copy_from_slice(f.pyth_oracle.as_ref());
        d[171..179].copy_from_slice(&f.available.to_le_bytes());
        let borrowed_wads = f.borrowed as u128 * 1_000_000_000_000_000_000;
        d[179..195].copy_from_slice(&borrowed_wads.to_le_bytes());
        let price_wads = f.market_price_usd as u128 * 1_000_000_000_000_000_000;
        d[211..227].copy_from_slice(&price_wads.to_le_bytes());
        d[227..259].copy_from_slice(f.collateral_mint.as_ref());
        d[267..299].copy_from_slice(Pubkey::new_from_array([6; 32]).as_ref());
        d[299] = f.optimal_util;
        d[303] = f.min_rate;
        d[304] = f.optimal_rate;
        d[305] = f.max_rate;
        d[372] = f.take_rate;
        d
    }

    pub(crate) fn encode_price(price: i64, exponent: i32, status: u32) -> Vec<u8> {
        let mut d = vec![0u8; PYTH_MIN_LEN];
        d[0..4].copy_from_slice(&PYTH_MAGIC.to_le_bytes());
        d[4..8].copy_from_slice(&PYTH_VERSION.to_le_bytes());
        d[8..12].copy_from_slice(&PYTH_PRICE_ACCOUNT_TYPE.to_le_bytes());
        d[20..24].copy_from_slice(&exponent.to_le_bytes());
        d[208..216].copy_from_slice(&price.to_le_bytes());
        d[216..224].copy_from_slice(&1_000u64.to_le_bytes());
        d[224..228].copy_from_slice(&status.to_le_bytes());
        d
    }
}

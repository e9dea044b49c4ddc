use std::env;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::account::Amount;

/// Commission rates are expressed in basis points of the triggering reward.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Deployment tunables, supplied by the shell and immutable for the process
/// lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Points credited per completed action.
    pub reward_points: Amount,
    /// Rewardable actions per account per calendar day.
    pub daily_action_limit: u32,
    /// Referrer commission, in basis points of the reward.
    pub commission_bps: u32,
    /// One-time bonus for registering through a referral.
    pub signup_bonus: Amount,
    /// Smallest withdrawal the ledger accepts.
    pub min_withdraw_points: Amount,
    /// Points per one currency unit when deriving payout amounts.
    pub points_per_currency_unit: Amount,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reward_points: 20,
            daily_action_limit: 30,
            commission_bps: 500,
            signup_bonus: 250,
            min_withdraw_points: 5_000,
            points_per_currency_unit: 250,
        }
    }
}

impl LedgerConfig {
    /// Read configuration from the environment, falling back to defaults
    /// for unset or unparseable values. Variables: `AD_REWARD_POINTS`,
    /// `DAILY_TASK_LIMIT`, `REFERRAL_COMMISSION_BPS` (integer basis
    /// points, not a percent float), `REFERRAL_BONUS_POINTS`,
    /// `MIN_WITHDRAW_POINTS`, `POINTS_PER_CURRENCY_UNIT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut config = Self {
            reward_points: env_or("AD_REWARD_POINTS", defaults.reward_points),
            daily_action_limit: env_or("DAILY_TASK_LIMIT", defaults.daily_action_limit),
            commission_bps: env_or("REFERRAL_COMMISSION_BPS", defaults.commission_bps),
            signup_bonus: env_or("REFERRAL_BONUS_POINTS", defaults.signup_bonus),
            min_withdraw_points: env_or("MIN_WITHDRAW_POINTS", defaults.min_withdraw_points),
            points_per_currency_unit: env_or(
                "POINTS_PER_CURRENCY_UNIT",
                defaults.points_per_currency_unit,
            ),
        };
        if config.points_per_currency_unit == 0 {
            log::warn!(
                "POINTS_PER_CURRENCY_UNIT must be positive, using default {}",
                defaults.points_per_currency_unit
            );
            config.points_per_currency_unit = defaults.points_per_currency_unit;
        }
        config
    }

    /// Referrer commission for one reward, floored to the nearest point.
    pub fn commission_for(&self, reward: Amount) -> Amount {
        reward * self.commission_bps as u64 / BPS_DENOMINATOR
    }
}

fn env_or<T: FromStr + Display + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("invalid {name}={raw:?}, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

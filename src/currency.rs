use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::Amount;

/// Minor units per currency unit: amounts carry four decimal places so the
/// point-to-currency conversion stays exact for any divisor up to 10 000.
pub const CURRENCY_SCALE: u64 = 10_000;

/// Currency value in scaled minor units. Derived from points at the moment
/// a withdrawal is recorded; formatted only at the boundary.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CurrencyAmount {
    minor_units: u64,
}

impl CurrencyAmount {
    /// Convert a point total at `points_per_unit` points to one currency
    /// unit, flooring to the nearest minor unit.
    pub fn from_points(points: Amount, points_per_unit: Amount) -> Self {
        debug_assert!(points_per_unit > 0);
        let minor = (points as u128 * CURRENCY_SCALE as u128) / points_per_unit as u128;
        Self {
            minor_units: minor as u64,
        }
    }

    pub fn minor_units(&self) -> u64 {
        self.minor_units
    }

    pub fn whole_units(&self) -> u64 {
        self.minor_units / CURRENCY_SCALE
    }
}

impl fmt::Display for CurrencyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:04}",
            self.minor_units / CURRENCY_SCALE,
            self.minor_units % CURRENCY_SCALE
        )
    }
}

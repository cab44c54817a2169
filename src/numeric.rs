//! Fixed-point numeric newtypes used by the ledger.
//!
//! All engine arithmetic is integer arithmetic on `u128` values at a common
//! working precision of [`SCALE`] (18 decimals). Products are computed through
//! 256-bit intermediates so `a * b / c` never overflows for in-range operands.

use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Working precision of the ledger: one whole unit is `10^18`.
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// `a * b / denom` with a 256-bit intermediate product.
///
/// Returns `None` when `denom` is zero or the quotient does not fit in `u128`.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Option<u128> {
    if denom == 0 {
        return None;
    }
    let quotient = (U256::from(a) * U256::from(b)) / U256::from(denom);
    if quotient > U256::from(u128::MAX) {
        None
    } else {
        Some(quotient.as_u128())
    }
}

macro_rules! impl_fixed_point {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u128);

        impl $name {
            pub const ZERO: Self = Self(0);

            pub const fn new(raw: u128) -> Self {
                Self(raw)
            }

            pub const fn to_u128(self) -> u128 {
                self.0
            }

            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }

            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }
        }

        impl From<u128> for $name {
            fn from(raw: u128) -> Self {
                Self(raw)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, other: Self) -> Self {
                Self(self.0 + other.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, other: Self) -> Self {
                Self(self.0 - other.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, other: Self) {
                self.0 += other.0;
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, other: Self) {
                self.0 -= other.0;
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::ZERO, |acc, x| acc + x)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

impl_fixed_point!(
    Quantity,
    "A collateral quantity in [`SCALE`] fixed-point units of the asset."
);
impl_fixed_point!(
    Amount,
    "A unit-of-account amount in [`SCALE`] fixed-point units."
);
impl_fixed_point!(
    Price,
    "Unit-of-account per whole collateral unit, normalized to [`SCALE`]."
);

/// A dimensionless scalar at [`SCALE`] fixed-point; `Ratio::ONE` is `1.0`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ratio(u128);

impl Ratio {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(SCALE);

    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// Decimal rendering for operator-facing output; saturates at
    /// `Decimal::MAX` for ratios too large to represent.
    pub fn to_decimal(self) -> Decimal {
        match i128::try_from(self.0) {
            Ok(raw) => Decimal::try_from_i128_with_scale(raw, 18).unwrap_or(Decimal::MAX),
            Err(_) => Decimal::MAX,
        }
    }

    pub fn to_f64(self) -> f64 {
        use num_traits::ToPrimitive;
        self.to_decimal().to_f64().unwrap_or(f64::MAX)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// Solvency measure of an account.
///
/// A debt-free account has no meaningful ratio and is `Unbounded`, which
/// compares greater than every bounded value.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum HealthFactor {
    Healthy(Ratio),
    Unbounded,
}

impl HealthFactor {
    /// Whether the account is below the configured minimum, i.e. eligible
    /// for liquidation.
    pub fn is_below(&self, minimum: Ratio) -> bool {
        match self {
            HealthFactor::Healthy(ratio) => *ratio < minimum,
            HealthFactor::Unbounded => false,
        }
    }
}

impl fmt::Display for HealthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthFactor::Healthy(ratio) => write!(f, "{ratio}"),
            HealthFactor::Unbounded => write!(f, "unbounded"),
        }
    }
}

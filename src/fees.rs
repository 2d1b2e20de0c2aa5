//! Fee schedule and cross-decimal rescaling.
//!
//! All policy here is integer base-unit arithmetic; the only place decimal
//! strings exist is the adapter boundary (`chain_n::format_usdd_amount`).

/// Rescale an integer amount from `src_decimals` to `dst_decimals`, rounding down
/// when narrowing.
pub fn scale_amount(amount: i64, src_decimals: u32, dst_decimals: u32) -> i64 {
    if src_decimals == dst_decimals {
        return amount;
    }
    if src_decimals < dst_decimals {
        amount * 10_i64.pow(dst_decimals - src_decimals)
    } else {
        amount / 10_i64.pow(src_decimals - dst_decimals)
    }
}

/// Flat + dynamic-bps fee schedule, exact-integer, rounding down at every step.
/// `payout = max(0, amount - flat - dyn)`.
pub fn compute_payout(amount: i64, flat_fee: i64, dynamic_fee_bps: i64) -> FeeBreakdown {
    let flat = flat_fee.max(0);
    let net_before_dyn = (amount - flat).max(0);
    let dynamic = (net_before_dyn * dynamic_fee_bps.max(0)) / 10_000;
    let payout = (amount - flat - dynamic).max(0);
    FeeBreakdown {
        flat,
        dynamic,
        payout,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub flat: i64,
    pub dynamic: i64,
    pub payout: i64,
}

/// Policy seam for converting accumulated Chain-S fees into native gas token via an
/// external DEX. Explicitly out of the critical path (spec §1 Non-goals: acting as an
/// automated market maker). The no-op implementation is the only one this crate ships;
/// a real DEX-backed implementation is a collaborator, not core.
pub trait FeeConversionPolicy: Send + Sync {
    /// Returns the amount actually converted (base units), or 0 if this tick declines to act.
    fn maybe_convert(&self, accumulated_fee_units: i64) -> i64;
}

pub struct NoopFeeConversionPolicy;

impl FeeConversionPolicy for NoopFeeConversionPolicy {
    fn maybe_convert(&self, _accumulated_fee_units: i64) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_deposit_fee() {
        // USDC_DECIMALS=USDD_DECIMALS=6, FLAT_FEE_USDC_UNITS=500_000, DYNAMIC_FEE_BPS=10
        let fee = compute_payout(10_000_000, 500_000, 10);
        assert_eq!(fee.flat, 500_000);
        assert_eq!(fee.dynamic, 9_500);
        assert_eq!(fee.payout, 9_490_500);
    }

    #[test]
    fn scenario_4_credit_fee() {
        let fee = compute_payout(2_000_000, 500_000, 10);
        assert_eq!(fee.payout, 1_498_500);
    }

    #[test]
    fn zero_payout_when_amount_below_flat_fee() {
        let fee = compute_payout(100_000, 500_000, 10);
        assert_eq!(fee.payout, 0);
    }

    #[test]
    fn scale_amount_same_decimals_is_identity() {
        assert_eq!(scale_amount(123_456, 6, 6), 123_456);
    }

    #[test]
    fn scale_amount_widens_by_multiplying() {
        assert_eq!(scale_amount(1, 6, 8), 100);
    }

    #[test]
    fn scale_amount_narrows_by_truncating_down() {
        assert_eq!(scale_amount(199, 8, 6), 1);
    }
}

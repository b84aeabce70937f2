use crate::U256;

/// secp256k1 group order N.
pub const SECP256K1_N: U256 = U256::from_limbs([
    0xbfd2_5e8c_d036_4141,
    0xbaae_dce6_af48_a03b,
    0xffff_ffff_ffff_fffe,
    0xffff_ffff_ffff_ffff,
]);

/// N / 2, the upper bound for `s` under the homestead rule.
pub const SECP256K1_HALF_N: U256 = U256::from_limbs([
    0xdfe9_2f46_681b_20a0,
    0x5d57_6e73_57a4_501d,
    0xffff_ffff_ffff_ffff,
    0x7fff_ffff_ffff_ffff,
]);

/// Validate recoverable-signature components.
///
/// `v` must be a recovery id (0 or 1) and `r`/`s` must lie in `[1, N)`.
/// With `homestead` set, `s` is additionally capped at `N/2` (the low-s
/// rule); contract-level recovery uses the relaxed check.
pub fn validate_signature_values(v: u8, r: &U256, s: &U256, homestead: bool) -> bool {
    if r.is_zero() || s.is_zero() {
        return false;
    }
    if homestead && *s > SECP256K1_HALF_N {
        return false;
    }
    *r < SECP256K1_N && *s < SECP256K1_N && (v == 0 || v == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_n_is_half() {
        // N is odd, so 2 * (N / 2) + 1 == N.
        let double = SECP256K1_HALF_N.checked_mul_u64(2).unwrap();
        assert_eq!(double.checked_add_u64(1).unwrap(), SECP256K1_N);
    }

    #[test]
    fn test_validate_rejects_zero_and_high() {
        let one = U256::ONE;
        assert!(validate_signature_values(0, &one, &one, false));
        assert!(validate_signature_values(1, &one, &one, true));

        assert!(!validate_signature_values(0, &U256::ZERO, &one, false));
        assert!(!validate_signature_values(0, &one, &U256::ZERO, false));
        assert!(!validate_signature_values(2, &one, &one, false));
        assert!(!validate_signature_values(0, &SECP256K1_N, &one, false));
        assert!(!validate_signature_values(0, &one, &SECP256K1_N, false));
    }

    #[test]
    fn test_homestead_s_cap() {
        let high_s = SECP256K1_HALF_N.checked_add_u64(1).unwrap();
        // Relaxed check accepts high-s values below N.
        assert!(validate_signature_values(0, &U256::ONE, &high_s, false));
        // Homestead rejects them.
        assert!(!validate_signature_values(0, &U256::ONE, &high_s, true));
    }
}

use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// 256-bit unsigned integer for balances and token amounts.
///
/// Stored as 4 x u64 in little-endian limb order. Arithmetic is checked;
/// overflow and underflow return `None` instead of wrapping. Amounts are
/// non-negative by construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256([u64; 4]);

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl U256 {
    pub const ZERO: Self = Self([0, 0, 0, 0]);
    pub const ONE: Self = Self([1, 0, 0, 0]);
    pub const MAX: Self = Self([u64::MAX, u64::MAX, u64::MAX, u64::MAX]);

    pub const fn from_limbs(limbs: [u64; 4]) -> Self {
        Self(limbs)
    }

    pub const fn as_limbs(&self) -> &[u64; 4] {
        &self.0
    }

    pub const fn from_u64(val: u64) -> Self {
        Self([val, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0, 0]
    }

    /// Low 64 bits, discarding higher limbs.
    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Big-endian 32-byte representation.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            out[32 - 8 * (i + 1)..32 - 8 * i].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    /// Parse from up to 32 big-endian bytes.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() > 32 {
            return Err(TypesError::InvalidNumber(format!(
                "{} bytes exceed 256 bits",
                bytes.len()
            )));
        }
        let mut padded = [0u8; 32];
        padded[32 - bytes.len()..].copy_from_slice(bytes);
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&padded[32 - 8 * (i + 1)..32 - 8 * i]);
            *limb = u64::from_be_bytes(chunk);
        }
        Ok(Self(limbs))
    }

    /// Checked addition
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        let mut result = [0u64; 4];
        let mut carry = 0u64;

        for i in 0..4 {
            let (sum1, overflow1) = self.0[i].overflowing_add(rhs.0[i]);
            let (sum2, overflow2) = sum1.overflowing_add(carry);
            result[i] = sum2;
            carry = (overflow1 as u64) + (overflow2 as u64);
        }

        if carry != 0 {
            None
        } else {
            Some(Self(result))
        }
    }

    /// Checked subtraction
    pub fn checked_sub(&self, rhs: &Self) -> Option<Self> {
        if self < rhs {
            return None;
        }

        let mut result = [0u64; 4];
        let mut borrow = 0u64;

        for i in 0..4 {
            let (diff1, underflow1) = self.0[i].overflowing_sub(rhs.0[i]);
            let (diff2, underflow2) = diff1.overflowing_sub(borrow);
            result[i] = diff2;
            borrow = (underflow1 as u64) | (underflow2 as u64);
        }

        Some(Self(result))
    }

    /// Multiply by a u64 scalar, checking for overflow.
    pub fn checked_mul_u64(&self, rhs: u64) -> Option<Self> {
        let mut result = [0u64; 4];
        let mut carry = 0u128;

        for i in 0..4 {
            let product = (self.0[i] as u128) * (rhs as u128) + carry;
            result[i] = product as u64;
            carry = product >> 64;
        }

        if carry != 0 {
            None
        } else {
            Some(Self(result))
        }
    }

    /// Add a u64 scalar, checking for overflow.
    pub fn checked_add_u64(&self, rhs: u64) -> Option<Self> {
        self.checked_add(&Self::from_u64(rhs))
    }

    /// Divide by a u64 scalar, returning quotient and remainder.
    fn div_rem_u64(&self, div: u64) -> (Self, u64) {
        debug_assert!(div != 0);
        let mut quot = [0u64; 4];
        let mut rem = 0u128;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.0[i] as u128;
            quot[i] = (cur / div as u128) as u64;
            rem = cur % div as u128;
        }
        (Self(quot), rem as u64)
    }

    /// Parse a numeric string, auto-detecting the base: a `0x`/`0X`
    /// prefix selects hexadecimal, anything else decimal. Mirrors the
    /// base-detection amounts arrive with in host calls.
    pub fn from_dec_or_hex(s: &str) -> Result<Self, TypesError> {
        if let Some(body) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Self::from_str_radix(body, 16)
        } else {
            Self::from_str_radix(s, 10)
        }
    }

    fn from_str_radix(s: &str, radix: u64) -> Result<Self, TypesError> {
        if s.is_empty() {
            return Err(TypesError::InvalidNumber(s.to_string()));
        }
        let mut acc = Self::ZERO;
        for c in s.chars() {
            let digit = c
                .to_digit(radix as u32)
                .ok_or_else(|| TypesError::InvalidNumber(s.to_string()))?;
            acc = acc
                .checked_mul_u64(radix)
                .and_then(|v| v.checked_add_u64(digit as u64))
                .ok_or_else(|| TypesError::InvalidNumber(s.to_string()))?;
        }
        Ok(acc)
    }
}

impl From<u64> for U256 {
    fn from(val: u64) -> Self {
        Self::from_u64(val)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        // Peel 19 decimal digits at a time (largest power of ten in u64).
        const CHUNK: u64 = 10_000_000_000_000_000_000;
        let mut chunks = Vec::new();
        let mut cur = *self;
        while !cur.is_zero() {
            let (quot, rem) = cur.div_rem_u64(CHUNK);
            chunks.push(rem);
            cur = quot;
        }
        let mut out = chunks
            .pop()
            .map(|head| head.to_string())
            .unwrap_or_default();
        while let Some(chunk) = chunks.pop() {
            out.push_str(&format!("{:019}", chunk));
        }
        write!(f, "{}", out)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({})", self)
    }
}

impl FromStr for U256 {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_dec_or_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u64_roundtrip() {
        let v = U256::from_u64(123_456);
        assert_eq!(v.low_u64(), 123_456);
        assert_eq!(v.to_string(), "123456");
    }

    #[test]
    fn test_checked_add_sub() {
        let a = U256::from_u64(100);
        let b = U256::from_u64(42);
        assert_eq!(a.checked_add(&b).unwrap(), U256::from_u64(142));
        assert_eq!(a.checked_sub(&b).unwrap(), U256::from_u64(58));
        assert_eq!(b.checked_sub(&a), None);
        assert_eq!(U256::MAX.checked_add(&U256::ONE), None);
    }

    #[test]
    fn test_carry_propagation() {
        let a = U256::from_limbs([u64::MAX, 0, 0, 0]);
        let sum = a.checked_add(&U256::ONE).unwrap();
        assert_eq!(sum, U256::from_limbs([0, 1, 0, 0]));
        assert_eq!(sum.checked_sub(&U256::ONE).unwrap(), a);
    }

    #[test]
    fn test_mul_u64_overflow() {
        assert_eq!(
            U256::from_u64(6).checked_mul_u64(7).unwrap(),
            U256::from_u64(42)
        );
        assert_eq!(U256::MAX.checked_mul_u64(2), None);
    }

    #[test]
    fn test_parse_auto_radix() {
        assert_eq!(U256::from_dec_or_hex("255").unwrap(), U256::from_u64(255));
        assert_eq!(U256::from_dec_or_hex("0xff").unwrap(), U256::from_u64(255));
        assert_eq!(U256::from_dec_or_hex("0Xff").unwrap(), U256::from_u64(255));
        assert!(U256::from_dec_or_hex("").is_err());
        assert!(U256::from_dec_or_hex("12g4").is_err());
        assert!(U256::from_dec_or_hex("-5").is_err());
    }

    #[test]
    fn test_display_large() {
        // 2^64 = 18446744073709551616
        let v = U256::from_limbs([0, 1, 0, 0]);
        assert_eq!(v.to_string(), "18446744073709551616");
        let parsed: U256 = "18446744073709551616".parse().unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn test_be_bytes_roundtrip() {
        let v: U256 = "0xdeadbeef00112233445566778899aabb".parse().unwrap();
        let bytes = v.to_be_bytes();
        assert_eq!(U256::from_be_bytes(&bytes).unwrap(), v);
        // Short slices are left-padded
        assert_eq!(
            U256::from_be_bytes(&[0x01, 0x00]).unwrap(),
            U256::from_u64(256)
        );
    }

    #[test]
    fn test_ordering() {
        let small = U256::from_u64(5);
        let big = U256::from_limbs([0, 0, 0, 1]);
        assert!(small < big);
        assert_eq!(small.cmp(&small), std::cmp::Ordering::Equal);
    }
}

//! Signature recovery host functions.

use std::sync::Arc;

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use tcvm_types::{keccak256, validate_signature_values, Address, Hash, U256};
use tracing::debug;

use super::{arg, frame, get_string, set_bytes};
use crate::engine::Engine;
use crate::env::{EnvFunc, EnvTable};
use crate::error::VmError;
use crate::gas::{CHECK_SIGN_GAS, ECRECOVER_GAS};

/// Chain identifier folded into the recovery byte of contract-visible
/// signatures (`v = rec_id + 2·CHAIN_ID + 35`).
pub const CHAIN_ID: u64 = 30261;

pub fn register(table: &mut EnvTable) {
    table.register("TC_CheckSign", Arc::new(TcCheckSign));
    table.register("TC_Ecrecover", Arc::new(TcEcrecover));
}

/// Decode a hex string, tolerating a `0x` prefix and odd digit counts.
fn from_hex(raw: &[u8]) -> Result<Vec<u8>, VmError> {
    let s = std::str::from_utf8(raw).map_err(|_| VmError::InvalidApiArgs)?;
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let padded = if body.len() % 2 == 1 {
        format!("0{body}")
    } else {
        body.to_string()
    };
    hex::decode(padded).map_err(|_| VmError::InvalidApiArgs)
}

/// Recover the signer address from a 32-byte message hash and a 65-byte
/// `r || s || rec_id` signature.
fn recover_address(hash: &[u8], sig: &[u8]) -> Result<Address, VmError> {
    if sig.len() != 65 {
        return Err(VmError::InvalidApiArgs);
    }
    let signature = Signature::from_slice(&sig[..64]).map_err(|_| VmError::InvalidApiArgs)?;
    let rec_id = RecoveryId::from_byte(sig[64]).ok_or(VmError::InvalidApiArgs)?;
    let key = VerifyingKey::recover_from_prehash(hash, &signature, rec_id)
        .map_err(|_| VmError::InvalidApiArgs)?;

    // Uncompressed SEC1 point: 0x04 || X || Y; the address is the tail
    // of keccak256(X || Y).
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..]).map_err(|_| VmError::InvalidApiArgs)
}

// int TC_CheckSign(const char *addr, const char *data, const char *sig)
//
// Returns 1 when the signature over `data` recovers to `addr`.
pub struct TcCheckSign;

impl EnvFunc for TcCheckSign {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(CHECK_SIGN_GAS)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let addr_raw = get_string(&app, arg(args, 0)?)?;
        let data_raw = get_string(&app, arg(args, 1)?)?;
        let sig_raw = get_string(&app, arg(args, 2)?)?;

        let claimed = super::parse_address(&addr_raw)?;
        let data = from_hex(&data_raw)?;
        let sig = from_hex(&sig_raw)?;

        let recovered = recover_address(&data, &sig)?;
        debug!(%claimed, %recovered, "TC_CheckSign");
        Ok(u64::from(claimed == recovered))
    }
}

// char *TC_Ecrecover(const char *hash, const char *v, const char *r, const char *s)
//
// Chain-adjusted recovery: `v` carries `2·CHAIN_ID + 35`, and `s` is
// validated with the relaxed (non-homestead) range.
pub struct TcEcrecover;

impl EnvFunc for TcEcrecover {
    fn gas(&self, _index: i64, _eng: &mut Engine, _args: &[u64]) -> Result<u64, VmError> {
        Ok(ECRECOVER_GAS)
    }

    fn call(&self, _index: i64, eng: &mut Engine, args: &[u64]) -> Result<u64, VmError> {
        let app = frame(eng)?;
        let hash_raw = get_string(&app, arg(args, 0)?)?;
        let v_raw = get_string(&app, arg(args, 1)?)?;
        let r_raw = get_string(&app, arg(args, 2)?)?;
        let s_raw = get_string(&app, arg(args, 3)?)?;

        let hash = Hash::from_bytes_padded(&from_hex(&hash_raw)?);
        let v = super::parse_amount(&v_raw)?;
        let r = super::parse_amount(&r_raw)?;
        let s = super::parse_amount(&s_raw)?;

        let adjust = U256::from_u64(2 * CHAIN_ID + 35);
        let rec = v
            .checked_sub(&adjust)
            .filter(|rec| *rec <= U256::ONE)
            .ok_or(VmError::InvalidApiArgs)?
            .low_u64() as u8;
        if !validate_signature_values(rec, &r, &s, false) {
            return Err(VmError::InvalidApiArgs);
        }

        let mut sig = [0u8; 65];
        sig[..32].copy_from_slice(&r.to_be_bytes());
        sig[32..64].copy_from_slice(&s.to_be_bytes());
        sig[64] = rec;

        let recovered = recover_address(hash.as_bytes(), &sig)?;
        let ret = recovered.to_hex();
        debug!(ret, "TC_Ecrecover");
        set_bytes(&app, ret.as_bytes()).map_err(|_| VmError::MemorySet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{engine_with_frame, wat};
    use k256::ecdsa::SigningKey;

    fn write(app: &crate::app::App, data: &[u8]) -> u64 {
        app.memory().lock().set_bytes(data).unwrap()
    }

    fn test_key() -> (SigningKey, Address) {
        let key = SigningKey::from_slice(&[0x11u8; 32]).unwrap();
        let point = key.verifying_key().to_encoded_point(false);
        let digest = keccak256(&point.as_bytes()[1..]);
        (key.clone(), Address::from_slice(&digest[12..]).unwrap())
    }

    #[test]
    fn test_check_sign_accepts_own_signature() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let (key, addr) = test_key();
        let hash = keccak256(b"signed payload");
        let (sig, rec) = key.sign_prehash_recoverable(&hash).unwrap();

        let mut sig_bytes = sig.to_bytes().to_vec();
        sig_bytes.push(rec.to_byte());

        let addr_ptr = write(&app, addr.to_hex().as_bytes());
        let data_ptr = write(&app, format!("0x{}", hex::encode(hash)).as_bytes());
        let sig_ptr = write(&app, format!("0x{}", hex::encode(&sig_bytes)).as_bytes());

        let ok = TcCheckSign
            .call(-1, &mut eng, &[addr_ptr, data_ptr, sig_ptr])
            .unwrap();
        assert_eq!(ok, 1);

        // A different claimed address yields 0, not an error.
        let other = Address::from_bytes([0xabu8; 20]);
        let other_ptr = write(&app, other.to_hex().as_bytes());
        let ok = TcCheckSign
            .call(-1, &mut eng, &[other_ptr, data_ptr, sig_ptr])
            .unwrap();
        assert_eq!(ok, 0);
    }

    #[test]
    fn test_ecrecover_roundtrip() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let (key, addr) = test_key();
        let hash = keccak256(b"ecrecover me");
        let (sig, rec) = key.sign_prehash_recoverable(&hash).unwrap();

        let bytes = sig.to_bytes();
        let v = rec.to_byte() as u64 + 2 * CHAIN_ID + 35;

        let hash_ptr = write(&app, format!("0x{}", hex::encode(hash)).as_bytes());
        let v_ptr = write(&app, v.to_string().as_bytes());
        let r_ptr = write(&app, format!("0x{}", hex::encode(&bytes[..32])).as_bytes());
        let s_ptr = write(&app, format!("0x{}", hex::encode(&bytes[32..])).as_bytes());

        let ptr = TcEcrecover
            .call(-1, &mut eng, &[hash_ptr, v_ptr, r_ptr, s_ptr])
            .unwrap();
        let out = app.memory().lock().get_string(ptr).unwrap();
        assert_eq!(out, addr.to_hex().as_bytes());
    }

    #[test]
    fn test_ecrecover_rejects_bad_v() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let hash_ptr = write(&app, format!("0x{}", hex::encode([1u8; 32])).as_bytes());
        let v_ptr = write(&app, b"27"); // below the chain adjustment
        let r_ptr = write(&app, b"0x01");
        let s_ptr = write(&app, b"0x01");
        assert_eq!(
            TcEcrecover.call(-1, &mut eng, &[hash_ptr, v_ptr, r_ptr, s_ptr]),
            Err(VmError::InvalidApiArgs)
        );
    }

    #[test]
    fn test_ecrecover_rejects_zero_s() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let v = 2 * CHAIN_ID + 35;
        let hash_ptr = write(&app, format!("0x{}", hex::encode([1u8; 32])).as_bytes());
        let v_ptr = write(&app, v.to_string().as_bytes());
        let r_ptr = write(&app, b"0x01");
        let s_ptr = write(&app, b"0x00");
        assert_eq!(
            TcEcrecover.call(-1, &mut eng, &[hash_ptr, v_ptr, r_ptr, s_ptr]),
            Err(VmError::InvalidApiArgs)
        );
    }

    #[test]
    fn test_check_sign_bad_signature_length() {
        let (mut eng, app) = engine_with_frame(&wat::trivial_returner(), 1_000_000);
        let (_, addr) = test_key();
        let addr_ptr = write(&app, addr.to_hex().as_bytes());
        let data_ptr = write(&app, format!("0x{}", hex::encode([1u8; 32])).as_bytes());
        let sig_ptr = write(&app, b"0x0102");
        assert_eq!(
            TcCheckSign.call(-1, &mut eng, &[addr_ptr, data_ptr, sig_ptr]),
            Err(VmError::InvalidApiArgs)
        );
    }
}

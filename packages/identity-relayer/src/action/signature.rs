//! secp256k1 signing and recovery for digests and personal-sign messages.

use alloy::primitives::{eip191_hash_message, keccak256, Address, B256};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

fn malformed(reason: &str) -> crate::Error {
    crate::Error::Authorization(format!("malformed signature: {reason}"))
}

/// Recover the address that produced a 65-byte `r || s || v` signature over `digest`.
/// `v` may be 0/1 or 27/28.
pub fn recover_digest_signer(digest: B256, signature: &[u8]) -> Result<Address, crate::Error> {
    if signature.len() != 65 {
        return Err(malformed(&format!("expected 65 bytes, got {}", signature.len())));
    }
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => return Err(malformed(&format!("invalid recovery byte {other}"))),
    };
    let recovery_id = RecoveryId::try_from(i32::from(v)).map_err(|e| malformed(&e.to_string()))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| malformed(&e.to_string()))?;
    let public_key = Secp256k1::verification_only()
        .recover_ecdsa(&Message::from_digest(digest.0), &sig)
        .map_err(|e| crate::Error::Authorization(format!("signature recovery failed: {e}")))?;
    Ok(address_of(&public_key))
}

/// `personal_sign`: recover the signer of an EIP-191 prefixed message.
pub fn recover_personal_sign(message: &[u8], signature: &[u8]) -> Result<Address, crate::Error> {
    recover_digest_signer(eip191_hash_message(message), signature)
}

/// Sign a 32-byte digest. Returns `r || s || v` with `v` in {27, 28}.
pub fn sign_digest(secret: &SecretKey, digest: B256) -> [u8; 65] {
    let (recovery_id, compact) = Secp256k1::signing_only()
        .sign_ecdsa_recoverable(&Message::from_digest(digest.0), secret)
        .serialize_compact();
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&compact);
    out[64] = i32::from(recovery_id) as u8 + 27;
    out
}

/// Same layout as [`sign_digest`] but with the raw recovery id (0 or 1).
pub fn sign_digest_raw(secret: &SecretKey, digest: B256) -> ([u8; 64], u8) {
    let signed = sign_digest(secret, digest);
    let mut compact = [0u8; 64];
    compact.copy_from_slice(&signed[..64]);
    (compact, signed[64] - 27)
}

pub fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    Address::from_slice(&keccak256(&uncompressed[1..])[12..])
}

pub fn address_of_secret(secret: &SecretKey) -> Address {
    address_of(&secret.public_key(&Secp256k1::signing_only()))
}

/// Parse a hex (optionally `0x`-prefixed) secp256k1 secret.
pub fn parse_secret_key(hex_key: &str) -> Result<SecretKey, crate::Error> {
    let raw = hex::decode(hex_key.trim().trim_start_matches("0x"))
        .map_err(|e| crate::Error::Config(format!("Invalid secp256k1 key hex: {e}")))?;
    SecretKey::from_slice(&raw)
        .map_err(|e| crate::Error::Config(format!("Invalid secp256k1 key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known dev key 0.
    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_of_known_key() {
        let secret = parse_secret_key(KEY).unwrap();
        assert_eq!(
            address_of_secret(&secret),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_personal_sign_recovers_with_either_v_form() {
        let secret = parse_secret_key(KEY).unwrap();
        let message = b"Click sign to authenticate with identity service: 1700000000";
        let mut sig = sign_digest(&secret, eip191_hash_message(message));
        assert_eq!(recover_personal_sign(message, &sig).unwrap(), address_of_secret(&secret));

        sig[64] -= 27;
        assert_eq!(recover_personal_sign(message, &sig).unwrap(), address_of_secret(&secret));
    }

    #[test]
    fn test_other_message_recovers_other_address() {
        let secret = parse_secret_key(KEY).unwrap();
        let sig = sign_digest(&secret, eip191_hash_message(b"a"));
        assert_ne!(recover_personal_sign(b"b", &sig).unwrap(), address_of_secret(&secret));
    }

    #[test]
    fn test_malformed_signatures() {
        assert!(matches!(
            recover_digest_signer(B256::ZERO, &[0u8; 64]),
            Err(crate::Error::Authorization(_))
        ));
        let mut sig = [1u8; 65];
        sig[64] = 35;
        assert!(matches!(
            recover_digest_signer(B256::ZERO, &sig),
            Err(crate::Error::Authorization(_))
        ));
    }
}

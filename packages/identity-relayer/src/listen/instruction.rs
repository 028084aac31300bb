//! Listen transaction assembly: the native secp256k1 verification
//! instruction, the listen program call and a signed v0 transaction.

use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::secp256k1_instruction::new_secp256k1_instruction_with_signature;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::sysvar;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;

pub fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey, crate::Error> {
    Pubkey::from_str(value.trim())
        .map_err(|e| crate::Error::Config(format!("Invalid {what} {value}: {e}")))
}

/// Secp256k1 program instruction verifying one signature over `message`.
/// Its offsets point into itself, so it must sit at index 0.
pub fn secp256k1_verify(
    eth_address: &[u8; 20],
    signature: &[u8; 64],
    recovery_id: u8,
    message: &[u8],
) -> Result<Instruction, crate::Error> {
    if message.len() > usize::from(u16::MAX) {
        return Err(crate::Error::BadRequest("listen payload too large".into()));
    }
    Ok(new_secp256k1_instruction_with_signature(
        message,
        signature,
        recovery_id,
        eth_address,
    ))
}

/// The listen program call. The program reads the preceding verification
/// through the instructions sysvar.
pub fn submit_listen(program_id: Pubkey, valid_signer: Pubkey, data: &[u8]) -> Instruction {
    Instruction::new_with_bytes(
        program_id,
        data,
        vec![
            AccountMeta::new_readonly(valid_signer, false),
            AccountMeta::new_readonly(sysvar::instructions::ID, false),
        ],
    )
}

/// Compile a v0 message paid by `fee_payer`, its only signer, and sign it.
pub fn compile_transaction(
    instructions: &[Instruction],
    fee_payer: &Keypair,
    recent_blockhash: Hash,
) -> Result<VersionedTransaction, crate::Error> {
    let message = v0::Message::try_compile(&fee_payer.pubkey(), instructions, &[], recent_blockhash)
        .map_err(|e| crate::Error::BadRequest(format!("compile listen transaction: {e}")))?;
    VersionedTransaction::try_new(VersionedMessage::V0(message), &[fee_payer])
        .map_err(|e| crate::Error::Submission(format!("sign listen transaction: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECP256K1_PROGRAM: &str = "KeccakSecp256k11111111111111111111111111111";

    #[test]
    fn test_secp_instruction_layout() {
        let ix = secp256k1_verify(&[0xaa; 20], &[0xbb; 64], 1, b"hello").unwrap();
        assert_eq!(ix.program_id.to_string(), SECP256K1_PROGRAM);
        assert!(ix.accounts.is_empty());
        let d = &ix.data;
        assert_eq!(d[0], 1);
        assert_eq!(&d[12..32], &[0xaa; 20]);
        assert_eq!(&d[32..96], &[0xbb; 64][..]);
        assert_eq!(d[96], 1);
        assert_eq!(&d[97..], b"hello");
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let big = vec![0u8; usize::from(u16::MAX) + 1];
        assert!(matches!(
            secp256k1_verify(&[0; 20], &[0; 64], 0, &big),
            Err(crate::Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_v0_transaction_signed_by_fee_payer() {
        let payer = Keypair::new_from_array([7; 32]);
        let program = Pubkey::new_from_array([9; 32]);
        let signer = Pubkey::new_from_array([4; 32]);
        let instructions = vec![
            secp256k1_verify(&[1; 20], &[2; 64], 0, b"listen").unwrap(),
            submit_listen(program, signer, &[0, 1, 2]),
        ];
        let blockhash = Hash::new_from_array([3; 32]);
        let tx = compile_transaction(&instructions, &payer, blockhash).unwrap();

        let VersionedMessage::V0(message) = &tx.message else {
            panic!("expected a v0 message");
        };
        assert_eq!(message.header.num_required_signatures, 1);
        assert_eq!(message.account_keys[0], payer.pubkey());
        assert!(message.account_keys.contains(&program));
        assert!(message.account_keys.contains(&signer));
        assert!(message.account_keys.contains(&sysvar::instructions::ID));
        assert_eq!(message.recent_blockhash, blockhash);
        assert_eq!(message.instructions.len(), 2);
        assert!(tx.verify_with_results().into_iter().all(|ok| ok));
    }

    #[test]
    fn test_parse_pubkey() {
        let id = parse_pubkey(SECP256K1_PROGRAM, "program id").unwrap();
        assert_eq!(id.to_string(), SECP256K1_PROGRAM);
        assert!(matches!(
            parse_pubkey("not-base58-0OIl", "program id"),
            Err(crate::Error::Config(_))
        ));
    }
}

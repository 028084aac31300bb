//! Decoding of relayed meta-transactions.
//!
//! A relay request carries ABI-encoded calldata for one of a closed set of
//! contract methods. Decoding selects the [`ActionKind`] by its 4-byte
//! selector, extracts the action fields and rebuilds the EIP-712 message the
//! end user signed, so the subject signature can be checked before anything
//! is submitted.

pub mod schema;
mod signature;

pub use signature::{
    address_of_secret, parse_secret_key, recover_digest_signer, recover_personal_sign,
    sign_digest, sign_digest_raw,
};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolStruct};
use schema::{addUserCall, manageEntityCall, updateReplicaSetCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ManageEntity,
    AddUser,
    UpdateReplicaSet,
}

impl ActionKind {
    pub fn method(&self) -> &'static str {
        match self {
            ActionKind::ManageEntity => "manageEntity",
            ActionKind::AddUser => "addUser",
            ActionKind::UpdateReplicaSet => "updateReplicaSet",
        }
    }
}

/// The EIP-712 message the subject signed.
#[derive(Debug, Clone)]
enum SignedMessage {
    ManageEntity(schema::ManageEntity),
    AddUser(schema::AddUserRequest),
    UpdateReplicaSet(schema::UpdateReplicaSet),
}

/// A decoded meta-transaction. Immutable once decoded.
#[derive(Debug, Clone)]
pub struct DecodedAction {
    pub kind: ActionKind,
    pub entity_type: String,
    pub action: String,
    pub user_id: U256,
    pub entity_id: U256,
    pub metadata: String,
    /// Caller-chosen random nonce, forwarded untouched.
    pub nonce: B256,
    pub subject_signature: Bytes,
    /// `Some` for replica set updates; zero means first-time selection.
    pub old_primary_id: Option<U256>,
    message: SignedMessage,
}

impl DecodedAction {
    /// Composite rate-limit key, e.g. `CreateTrack`.
    pub fn action_key(&self) -> String {
        format!("{}{}", self.action, self.entity_type)
    }

    /// EIP-712 digest of the signed message under the kind's domain.
    pub fn signing_hash(&self, chain_id: u64, verifying_contract: Address) -> B256 {
        match &self.message {
            SignedMessage::ManageEntity(m) => {
                m.eip712_signing_hash(&schema::entity_manager_domain(chain_id, verifying_contract))
            }
            SignedMessage::AddUser(m) => {
                m.eip712_signing_hash(&schema::user_factory_domain(chain_id, verifying_contract))
            }
            SignedMessage::UpdateReplicaSet(m) => m.eip712_signing_hash(
                &schema::replica_set_manager_domain(chain_id, verifying_contract),
            ),
        }
    }

    /// Recover the subject that signed this action.
    pub fn recover_signer(
        &self,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Result<Address, crate::Error> {
        recover_digest_signer(
            self.signing_hash(chain_id, verifying_contract),
            &self.subject_signature,
        )
    }

    /// Reconfigures an existing replica set (not a first-time selection).
    pub fn is_replica_set_reconfiguration(&self) -> bool {
        match self.kind {
            ActionKind::UpdateReplicaSet => self.old_primary_id.is_some_and(|id| !id.is_zero()),
            ActionKind::ManageEntity => self.entity_type == "UserReplicaSet",
            ActionKind::AddUser => false,
        }
    }

    /// `keccak256(nonce || subjectSig)`, unique per signed meta-transaction.
    pub fn dedup_key(&self) -> B256 {
        let mut buf = Vec::with_capacity(32 + self.subject_signature.len());
        buf.extend_from_slice(self.nonce.as_slice());
        buf.extend_from_slice(&self.subject_signature);
        keccak256(buf)
    }
}

/// Decode calldata into a [`DecodedAction`]. Unknown selectors and malformed
/// arguments are decode errors.
pub fn decode_action(data: &[u8]) -> Result<DecodedAction, crate::Error> {
    if data.len() < 4 {
        return Err(crate::Error::Decode(format!(
            "calldata too short: {} bytes",
            data.len()
        )));
    }
    let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
    let abi_err = |e: alloy::sol_types::Error| crate::Error::Decode(e.to_string());

    if selector == manageEntityCall::SELECTOR {
        let call = manageEntityCall::abi_decode(data, true).map_err(abi_err)?;
        let message = schema::ManageEntity {
            userId: call._userId,
            entityType: call._entityType.clone(),
            entityId: call._entityId,
            action: call._action.clone(),
            metadata: call._metadata.clone(),
            nonce: call._nonce,
        };
        Ok(DecodedAction {
            kind: ActionKind::ManageEntity,
            entity_type: call._entityType,
            action: call._action,
            user_id: call._userId,
            entity_id: call._entityId,
            metadata: call._metadata,
            nonce: call._nonce,
            subject_signature: call._subjectSig,
            old_primary_id: None,
            message: SignedMessage::ManageEntity(message),
        })
    } else if selector == addUserCall::SELECTOR {
        let call = addUserCall::abi_decode(data, true).map_err(abi_err)?;
        Ok(DecodedAction {
            kind: ActionKind::AddUser,
            entity_type: "User".into(),
            action: "Create".into(),
            user_id: U256::ZERO,
            entity_id: U256::ZERO,
            metadata: String::new(),
            nonce: call._nonce,
            subject_signature: call._subjectSig,
            old_primary_id: None,
            message: SignedMessage::AddUser(schema::AddUserRequest {
                handle: call._handle,
                nonce: call._nonce,
            }),
        })
    } else if selector == updateReplicaSetCall::SELECTOR {
        let call = updateReplicaSetCall::abi_decode(data, true).map_err(abi_err)?;
        let message = schema::UpdateReplicaSet {
            userId: call._userId,
            primaryId: call._primaryId,
            secondaryIdsHash: schema::replica_ids_hash(&call._secondaryIds),
            oldPrimaryId: call._oldPrimaryId,
            oldSecondaryIdsHash: schema::replica_ids_hash(&call._oldSecondaryIds),
            nonce: call._nonce,
        };
        Ok(DecodedAction {
            kind: ActionKind::UpdateReplicaSet,
            entity_type: "UserReplicaSet".into(),
            action: "Update".into(),
            user_id: call._userId,
            entity_id: call._userId,
            metadata: String::new(),
            nonce: call._nonce,
            subject_signature: call._subjectSig,
            old_primary_id: Some(call._oldPrimaryId),
            message: SignedMessage::UpdateReplicaSet(message),
        })
    } else {
        Err(crate::Error::Decode(format!(
            "unsupported method selector 0x{}",
            hex::encode(selector)
        )))
    }
}

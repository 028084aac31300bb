//! ABI calls, EIP-712 message types and signing domains of the relayable
//! contracts. `uint` fields of the signed messages are `uint256`.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolValue};

sol! {
    function manageEntity(
        uint256 _userId,
        string _entityType,
        uint256 _entityId,
        string _action,
        string _metadata,
        bytes32 _nonce,
        bytes _subjectSig
    );

    function addUser(address _owner, bytes16 _handle, bytes32 _nonce, bytes _subjectSig);

    function updateReplicaSet(
        uint256 _userId,
        uint256 _primaryId,
        uint256[] _secondaryIds,
        uint256 _oldPrimaryId,
        uint256[] _oldSecondaryIds,
        bytes32 _nonce,
        bytes _subjectSig
    );

    #[derive(Debug)]
    struct ManageEntity {
        uint256 userId;
        string entityType;
        uint256 entityId;
        string action;
        string metadata;
        bytes32 nonce;
    }

    #[derive(Debug)]
    struct AddUserRequest {
        bytes16 handle;
        bytes32 nonce;
    }

    #[derive(Debug)]
    struct UpdateReplicaSet {
        uint256 userId;
        uint256 primaryId;
        bytes32 secondaryIdsHash;
        uint256 oldPrimaryId;
        bytes32 oldSecondaryIdsHash;
        bytes32 nonce;
    }
}

pub fn entity_manager_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: "Entity Manager",
        version: "1",
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

pub fn user_factory_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: "User Factory",
        version: "1",
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

pub fn replica_set_manager_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: "User Replica Set Manager",
        version: "1",
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

/// `keccak256(abi.encode(ids))`, the signed form of a replica id list.
pub fn replica_ids_hash(ids: &[U256]) -> B256 {
    keccak256(ids.to_vec().abi_encode())
}

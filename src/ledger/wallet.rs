//! Signing Wallet
//!
//! Holds the account's secp256k1 key and signs EIP-155 legacy transactions.
//! The key is only ever used in-process; it is never serialized or logged.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;

use crate::error::{AnchorError, Result};
use crate::ledger::rlp;
use crate::ledger::{keccak256, Address, TxHash};

/// Unsigned legacy (type 0) transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(u128::from(self.nonce)),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(u128::from(self.gas_limit)),
            rlp::encode_bytes(self.to.as_bytes()),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// Keccak-256 of `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`.
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(u128::from(chain_id)));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        keccak256(&rlp::encode_list(&fields))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

/// A signed transaction taken apart again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub transaction: LegacyTransaction,
    pub chain_id: u64,
    pub sender: Address,
    pub hash: TxHash,
}

#[derive(Clone)]
pub struct Wallet {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    address: Address,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Wallet {
    /// Load a key from hex, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self> {
        let trimmed = key.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed)
            .map_err(|_| AnchorError::CryptoError("private key is not valid hex".to_string()))?;
        let secret_key = SecretKey::from_slice(&bytes)?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secp,
            secret_key,
            address: address_of(&public_key),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign_transaction(
        &self,
        transaction: &LegacyTransaction,
        chain_id: u64,
    ) -> Result<SignedTransaction> {
        let message = Message::from_digest_slice(&transaction.signing_hash(chain_id))?;
        let signature = self.secp.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let v = chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + recovery_id.to_i32() as u64))
            .ok_or_else(|| AnchorError::CryptoError(format!("chain id {} too large", chain_id)))?;

        let mut fields = transaction.base_fields();
        fields.push(rlp::encode_uint(u128::from(v)));
        fields.push(rlp::encode_bytes(rlp::trim_leading_zeros(&compact[..32])));
        fields.push(rlp::encode_bytes(rlp::trim_leading_zeros(&compact[32..])));

        let raw = rlp::encode_list(&fields);
        let hash = TxHash(keccak256(&raw));
        Ok(SignedTransaction { raw, hash })
    }
}

fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Parse a raw EIP-155 transaction and recover its sender.
pub fn decode_signed_transaction(raw: &[u8]) -> Result<DecodedTransaction> {
    let fields = rlp::decode_flat_list(raw)?;
    if fields.len() != 9 {
        return Err(AnchorError::ProtocolError(format!(
            "legacy transaction has 9 fields, got {}",
            fields.len()
        )));
    }

    let to: [u8; 20] = fields[3].as_slice().try_into().map_err(|_| {
        AnchorError::ProtocolError("contract creation is not supported".to_string())
    })?;
    let transaction = LegacyTransaction {
        nonce: narrow(rlp::decode_uint(&fields[0])?, "nonce")?,
        gas_price: rlp::decode_uint(&fields[1])?,
        gas_limit: narrow(rlp::decode_uint(&fields[2])?, "gas limit")?,
        to: Address(to),
        value: rlp::decode_uint(&fields[4])?,
        data: fields[5].clone(),
    };

    let v = narrow(rlp::decode_uint(&fields[6])?, "v")?;
    if v < 35 {
        return Err(AnchorError::CryptoError(
            "transaction is not replay-protected (EIP-155)".to_string(),
        ));
    }
    let chain_id = (v - 35) / 2;
    let recovery_id = RecoveryId::from_i32(((v - 35) % 2) as i32)?;

    let mut compact = [0u8; 64];
    for (field, slot) in [(&fields[7], 0usize), (&fields[8], 32usize)] {
        if field.len() > 32 {
            return Err(AnchorError::CryptoError("signature component too long".to_string()));
        }
        compact[slot + 32 - field.len()..slot + 32].copy_from_slice(field);
    }
    let signature = RecoverableSignature::from_compact(&compact, recovery_id)?;
    let message = Message::from_digest_slice(&transaction.signing_hash(chain_id))?;
    let public_key = Secp256k1::verification_only().recover_ecdsa(&message, &signature)?;

    Ok(DecodedTransaction {
        transaction,
        chain_id,
        sender: address_of(&public_key),
        hash: TxHash(keccak256(raw)),
    })
}

fn narrow(value: u128, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| AnchorError::ProtocolError(format!("{} does not fit in 64 bits", field)))
}

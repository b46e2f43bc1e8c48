//! secp256k1 key generation, digest signing and EIP-155 transaction signing.
//!
//! Nothing in here performs I/O or holds state. Private keys come in and go out
//! as hex inside [`SecretString`]s and the decoded scalar only lives for the
//! duration of a single call.

use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::{Decodable2718, Encodable2718},
    signers::{local::PrivateKeySigner, SignerSync},
};
use alloy_primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::{
    error::{GuardianError, GuardianResult},
    primitives::decode_hex,
};

/// Length in bytes of a secp256k1 private key.
pub const PRIVATE_KEY_LEN: usize = 32;
/// Length in bytes of an `r ‖ s ‖ v` signature.
pub const SIGNATURE_LEN: usize = 65;

/// Parameters of a legacy transaction to be signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParams {
    /// Network the signature is bound to.
    pub chain_id: u64,
    /// Sender account nonce.
    pub nonce: u64,
    /// Recipient.
    pub to: Address,
    /// Value transferred, in wei.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price, in wei.
    pub gas_price: u128,
    /// Call data as hex, `0x` optional, empty for none.
    pub payload_hex: String,
}

/// A signed transaction in both of its output forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedTransaction {
    /// JSON form of the signed envelope.
    pub json: String,
    /// `0x`-prefixed canonical RLP encoding, ready for `eth_sendRawTransaction`.
    pub rlp: String,
}

/// Fields recovered from an encoded signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    /// Chain id the signature commits to, `None` for pre-EIP-155 transactions.
    pub chain_id: Option<u64>,
    /// Sender account nonce.
    pub nonce: u64,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    /// Value transferred, in wei.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price, in wei.
    pub gas_price: u128,
    /// Call data.
    pub payload: Bytes,
    /// Address recovered from the signature.
    pub from: Address,
}

/// Generates a fresh secp256k1 keypair.
///
/// Returns the private key as 64 lowercase hex characters and the EIP-55
/// checksummed address.
///
/// # Errors
/// Returns [`GuardianError::KeyGeneration`] if the OS entropy source fails.
pub fn generate_keypair() -> GuardianResult<(SecretString, String)> {
    let mut bytes = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
    OsRng
        .try_fill_bytes(bytes.as_mut_slice())
        .map_err(|e| GuardianError::KeyGeneration(format!("entropy source failed: {e}")))?;

    let signer = PrivateKeySigner::from_bytes(&B256::from_slice(bytes.as_slice()))
        .map_err(|e| GuardianError::KeyGeneration(format!("generated scalar rejected: {e}")))?;

    let private_key_hex = SecretString::from(hex::encode(bytes.as_slice()));
    Ok((private_key_hex, signer.address().to_checksum(None)))
}

/// Derives the checksummed address for a hex private key.
///
/// # Errors
/// Returns [`GuardianError::MalformedKey`] if the key does not decode to a valid scalar.
pub fn derive_address(private_key_hex: &SecretString) -> GuardianResult<String> {
    let signer = load_signer(private_key_hex)?;
    Ok(signer.address().to_checksum(None))
}

/// Signs a pre-hashed digest. No hashing is applied here.
///
/// # Errors
/// - [`GuardianError::MalformedKey`] if the key is invalid.
/// - [`GuardianError::SigningFailure`] if the digest is not 32 bytes or signing fails.
pub fn sign_digest(
    digest: &[u8],
    private_key_hex: &SecretString,
) -> GuardianResult<[u8; SIGNATURE_LEN]> {
    let signer = load_signer(private_key_hex)?;
    let hash = B256::try_from(digest).map_err(|_| {
        GuardianError::SigningFailure(format!(
            "digest must be 32 bytes, got {}",
            digest.len()
        ))
    })?;
    let signature = signer
        .sign_hash_sync(&hash)
        .map_err(|e| GuardianError::SigningFailure(e.to_string()))?;
    Ok(signature_bytes(&signature))
}

/// Builds, signs and encodes a legacy transaction bound to `params.chain_id`.
///
/// # Errors
/// - [`GuardianError::InvalidPayload`] if `payload_hex` is not hex.
/// - [`GuardianError::MalformedKey`] if the key is invalid.
/// - [`GuardianError::SigningFailure`] if signing or serialization fails.
pub fn sign_transaction(
    params: &TransactionParams,
    private_key_hex: &SecretString,
) -> GuardianResult<SignedTransaction> {
    let input = decode_hex(&params.payload_hex)
        .map_err(|e| GuardianError::InvalidPayload(format!("data is not valid hex: {e}")))?;
    let signer = load_signer(private_key_hex)?;

    let tx = TxLegacy {
        chain_id: Some(params.chain_id),
        nonce: params.nonce,
        gas_price: params.gas_price,
        gas_limit: params.gas_limit,
        to: TxKind::Call(params.to),
        value: params.value,
        input: Bytes::from(input),
    };
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| GuardianError::SigningFailure(e.to_string()))?;
    let envelope = TxEnvelope::from(tx.into_signed(signature));

    let json = serde_json::to_string(&envelope)
        .map_err(|e| GuardianError::SigningFailure(format!("could not encode signed tx: {e}")))?;
    let rlp = format!("0x{}", hex::encode(envelope.encoded_2718()));
    Ok(SignedTransaction { json, rlp })
}

/// Decodes a signed legacy transaction and recovers its sender.
///
/// # Errors
/// - [`GuardianError::InvalidPayload`] if the input is not a hex-encoded legacy transaction.
/// - [`GuardianError::SigningFailure`] if the signer cannot be recovered.
pub fn decode_transaction(rlp_hex: &str) -> GuardianResult<DecodedTransaction> {
    let raw = decode_hex(rlp_hex)
        .map_err(|e| GuardianError::InvalidPayload(format!("transaction is not valid hex: {e}")))?;
    let envelope = TxEnvelope::decode_2718(&mut raw.as_slice())
        .map_err(|e| GuardianError::InvalidPayload(format!("transaction does not decode: {e}")))?;
    let TxEnvelope::Legacy(signed) = envelope else {
        return Err(GuardianError::InvalidPayload(
            "only legacy transactions are produced by this signer".to_string(),
        ));
    };

    let tx = signed.tx();
    let from = signed
        .signature()
        .recover_address_from_prehash(&tx.signature_hash())
        .map_err(|e| GuardianError::SigningFailure(format!("cannot recover signer: {e}")))?;

    Ok(DecodedTransaction {
        chain_id: tx.chain_id,
        nonce: tx.nonce,
        to: tx.to.to().copied(),
        value: tx.value,
        gas_limit: tx.gas_limit,
        gas_price: tx.gas_price,
        payload: tx.input.clone(),
        from,
    })
}

fn load_signer(private_key_hex: &SecretString) -> GuardianResult<PrivateKeySigner> {
    let bytes = Zeroizing::new(decode_hex(private_key_hex.expose_secret()).map_err(|e| {
        GuardianError::MalformedKey(format!("private key is not valid hex: {e}"))
    })?);
    if bytes.len() != PRIVATE_KEY_LEN {
        return Err(GuardianError::MalformedKey(format!(
            "private key must be {PRIVATE_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    PrivateKeySigner::from_bytes(&B256::from_slice(&bytes))
        .map_err(|e| GuardianError::MalformedKey(format!("not a valid secp256k1 scalar: {e}")))
}

/// `r ‖ s ‖ v` with `v` as the raw recovery id (0 or 1).
fn signature_bytes(signature: &Signature) -> [u8; SIGNATURE_LEN] {
    let mut out = [0u8; SIGNATURE_LEN];
    out[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
    out[32..64].copy_from_slice(&signature.s().to_be_bytes::<32>());
    out[64] = u8::from(signature.v());
    out
}

//! Signature and permit verification contract.
//!
//! The cryptography lives behind [`SignatureVerifier`]; this module only fixes
//! which bytes are signed and how a verdict is consumed.

use async_trait::async_trait;
use serde::Serialize;

use autopilot_types::{Payload, PermitInfo, TaskId};

use crate::error::Result;

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Whether `signature` over `message` was produced by `owner_addr`.
    async fn verify(&self, message: &[u8], signature: &str, owner_addr: &str) -> Result<bool>;

    /// Whether the permit grants the engine rights over `nft_id`. Must be false
    /// once `permit.deadline` has passed `now`.
    async fn verify_permit(
        &self,
        permit: &PermitInfo,
        chain_id: u64,
        nft_id: u64,
        owner_addr: &str,
        now: i64,
    ) -> Result<bool>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMessage<'a> {
    owner_addr: &'a str,
    chain_id: u64,
    task_id: TaskId,
}

/// Bytes the owner signs to register a trigger.
pub fn create_message(payload: &Payload) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

/// Bytes the owner signs to delete a trigger.
pub fn delete_message(owner_addr: &str, chain_id: u64, task_id: TaskId) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&DeleteMessage { owner_addr, chain_id, task_id })?)
}

fn is_hex_signature(signature: &str) -> bool {
    signature
        .strip_prefix("0x")
        .map_or(false, |hex| hex.len() == 130 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Verifier for simulation mode. Accepts any well-formed 65-byte hex signature
/// and enforces permit deadlines; it does not recover signers.
#[derive(Debug, Default, Clone)]
pub struct SimulatedVerifier;

#[async_trait]
impl SignatureVerifier for SimulatedVerifier {
    async fn verify(&self, _message: &[u8], signature: &str, owner_addr: &str) -> Result<bool> {
        Ok(!owner_addr.is_empty() && is_hex_signature(signature))
    }

    async fn verify_permit(
        &self,
        permit: &PermitInfo,
        _chain_id: u64,
        _nft_id: u64,
        _owner_addr: &str,
        now: i64,
    ) -> Result<bool> {
        Ok(permit.deadline >= now && is_hex_signature(&permit.signature))
    }
}

//! Commitment Random Number Generation
//!
//! Provably-fair dice: every roll is an HMAC-SHA256 of `"{client_seed}:{nonce}"`
//! keyed by a secret server seed whose hash is published before the first roll.
//! Given the same `(server_seed, client_seed, nonce, sides)` the outcome is
//! identical on every platform, which is what makes scene replay possible.

use std::fmt;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use thiserror::Error;

use super::hash::{hash_with_domain, StateHash};

type HmacSha256 = Hmac<Sha256>;

/// Domain separator for seed commitments.
const COMMITMENT_DOMAIN: &[u8] = b"SCENE_ENGINE_COMMIT_V1";

/// Domain separator for deriving a server seed from a scene seed.
const SCENE_SEED_DOMAIN: &[u8] = b"SCENE_ENGINE_SERVER_SEED_V1";

/// Number of digest bytes used to derive the die value.
const VALUE_SLICE_BYTES: usize = 4;

/// Errors raised by the roll subsystem.
///
/// All of these are contract violations by the caller, never game outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RngError {
    /// A die must have at least one side.
    #[error("die must have at least one side (got {sides})")]
    InvalidSides {
        /// Requested side count.
        sides: u32,
    },

    /// HMAC rejected the key material.
    #[error("server seed rejected as HMAC key")]
    InvalidKey,

    /// Nonce did not strictly increase for this (scene, actor) pair.
    #[error("nonce {nonce} reused for actor {actor} (last was {last})")]
    NonceReuse {
        /// Actor the roll was for.
        actor: String,
        /// Offending nonce.
        nonce: u64,
        /// Highest nonce already consumed.
        last: u64,
    },

    /// Seed hex string could not be decoded.
    #[error("invalid server seed encoding")]
    InvalidSeed,
}

/// Secret per-scene server seed.
///
/// `Debug` never prints the seed; only its commitment is safe to publish
/// before the scene closes.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSeed([u8; 32]);

impl ServerSeed {
    /// Generate a fresh seed from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive a seed deterministically from a scene seed string.
    ///
    /// Used by replay fixtures and tests, where no entropy may be consumed
    /// beyond what the scene itself carries.
    pub fn from_scene_seed(scene_seed: &str) -> Self {
        Self(hash_with_domain(SCENE_SEED_DOMAIN, scene_seed.as_bytes()).0)
    }

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding (only publish after reveal).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, RngError> {
        let bytes = hex::decode(s).map_err(|_| RngError::InvalidSeed)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| RngError::InvalidSeed)?;
        Ok(Self(arr))
    }

    /// Commitment hash of this seed.
    pub fn commitment(&self) -> StateHash {
        hash_server_seed(self)
    }
}

impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerSeed(commit={})", self.commitment().short())
    }
}

impl Serialize for ServerSeed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ServerSeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServerSeed::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One-way commitment to a server seed, published before any roll.
pub fn hash_server_seed(seed: &ServerSeed) -> StateHash {
    hash_with_domain(COMMITMENT_DOMAIN, seed.as_bytes())
}

/// Result of a single die roll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    /// Face value in `[1, sides]`.
    pub value: u32,
    /// Hex HMAC digest the value was derived from.
    pub proof: String,
}

/// Roll one die.
///
/// `proof = HMAC-SHA256(key = server_seed, msg = "{client_seed}:{nonce}")`,
/// `value = be_u32(proof[0..4]) % sides + 1`.
///
/// # Errors
///
/// `sides == 0` is a caller bug and fails immediately.
pub fn roll(
    server_seed: &ServerSeed,
    client_seed: &str,
    nonce: u64,
    sides: u32,
) -> Result<RollOutcome, RngError> {
    if sides == 0 {
        return Err(RngError::InvalidSides { sides });
    }

    let mut mac =
        HmacSha256::new_from_slice(server_seed.as_bytes()).map_err(|_| RngError::InvalidKey)?;
    mac.update(client_seed.as_bytes());
    mac.update(b":");
    mac.update(nonce.to_string().as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut slice = [0u8; VALUE_SLICE_BYTES];
    slice.copy_from_slice(&digest[..VALUE_SLICE_BYTES]);
    let value = u32::from_be_bytes(slice) % sides + 1;

    Ok(RollOutcome {
        value,
        proof: hex::encode(digest),
    })
}

/// Injectable source of verifiable rolls.
///
/// The default is [`HmacRollProvider`]; a verifiable-random-function backend
/// can be swapped in without touching the orchestrator.
pub trait RollProvider: Send + Sync {
    /// Short name recorded alongside each roll.
    fn name(&self) -> &'static str;

    /// Produce an outcome for the given inputs.
    fn roll(
        &self,
        server_seed: &ServerSeed,
        client_seed: &str,
        nonce: u64,
        sides: u32,
    ) -> Result<RollOutcome, RngError>;

    /// Check an outcome against its inputs.
    fn verify(
        &self,
        server_seed: &ServerSeed,
        client_seed: &str,
        nonce: u64,
        sides: u32,
        outcome: &RollOutcome,
    ) -> Result<bool, RngError> {
        Ok(self.roll(server_seed, client_seed, nonce, sides)? == *outcome)
    }
}

/// HMAC-SHA256 commitment roller.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacRollProvider;

impl RollProvider for HmacRollProvider {
    fn name(&self) -> &'static str {
        "hmac-sha256"
    }

    fn roll(
        &self,
        server_seed: &ServerSeed,
        client_seed: &str,
        nonce: u64,
        sides: u32,
    ) -> Result<RollOutcome, RngError> {
        roll(server_seed, client_seed, nonce, sides)
    }
}

// =============================================================================
// TESTS
// =============================================================================

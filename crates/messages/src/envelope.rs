//! Signed message envelope.

use accord_types::{signing, Address, KeyPair, Signature, ValidatorSet};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Message code identifying the payload type of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageCode {
    /// Block proposal.
    Propose = 0,
    /// Prevote on a proposal (or nil).
    Prevote = 1,
    /// Precommit on a proposal (or nil), carrying a commit seal.
    Precommit = 2,
    /// Request for missed votes from a stuck peer.
    CatchUpRequest = 3,
    /// Reply carrying the votes a peer holds for a round/step.
    CatchUpReply = 4,
}

impl MessageCode {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCode::Propose => "propose",
            MessageCode::Prevote => "prevote",
            MessageCode::Precommit => "precommit",
            MessageCode::CatchUpRequest => "catch_up_request",
            MessageCode::CatchUpReply => "catch_up_reply",
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed consensus message.
///
/// The signature covers the code and payload (see
/// [`signing::envelope_message`]); the sender address is bound by verifying
/// the signature against the public key registered for that address in the
/// active validator set — the address field alone is never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    /// Payload type.
    pub code: MessageCode,
    /// Canonical-JSON-encoded payload.
    pub payload: Vec<u8>,
    /// Claimed sender address.
    pub address: Address,
    /// Signature over code and payload.
    pub signature: Signature,
}

/// Errors from envelope construction and verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Payload failed to encode or decode.
    #[error("payload codec failure: {0}")]
    Codec(String),

    /// Sender is not a member of the validator set for the message's view.
    #[error("sender {0} is not in the active validator set")]
    UnknownSender(Address),

    /// Signature does not verify against the sender's registered key.
    #[error("invalid signature from {0}")]
    InvalidSignature(Address),
}

impl ConsensusMessage {
    /// Build and sign an envelope around a payload.
    pub fn sign<T: Serialize>(
        code: MessageCode,
        payload: &T,
        keypair: &KeyPair,
    ) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_vec(payload).map_err(|e| EnvelopeError::Codec(e.to_string()))?;
        let signature = keypair.sign(&signing::envelope_message(code as u8, &payload));
        Ok(Self {
            code,
            payload,
            address: keypair.address(),
            signature,
        })
    }

    /// Verify the envelope against a validator set.
    ///
    /// Checks membership first, then the signature against the member's
    /// registered public key.
    pub fn verify(&self, validators: &ValidatorSet) -> Result<(), EnvelopeError> {
        let public_key = validators
            .public_key(self.address)
            .ok_or(EnvelopeError::UnknownSender(self.address))?;
        let message = signing::envelope_message(self.code as u8, &self.payload);
        if !public_key.verify(&message, &self.signature) {
            return Err(EnvelopeError::InvalidSignature(self.address));
        }
        Ok(())
    }

    /// Decode the payload as the given type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_slice(&self.payload).map_err(|e| EnvelopeError::Codec(e.to_string()))
    }
}

use std::collections::HashSet;

use super::{
    message::{Hashable, Round, Value},
    peers::{NodeId, Roster},
};
use crate::common::{
    crypto::{Keypair, Signature},
    error::{ChainError, ChainResult},
};

/*
    A signature chain is the proof-of-relay trail of a value. Each relayer
    signs the value itself and appends its link, so a chain with r + 1 links
    says r + 1 distinct nodes vouched for exactly this value. The validator
    catches forged provenance and padded chains. It cannot catch a signer
    that handed different values to different peers; that is left to the
    redundancy of the flooding rounds.
*/

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SignatureLink {
    pub signer_id: NodeId,
    pub signature: Signature,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SignatureChain {
    pub links: Vec<SignatureLink>,
}

impl SignatureChain {
    /// Starts a chain with the general's own signature.
    pub fn originate(signer_id: NodeId, keypair: &Keypair, value: Value) -> Self {
        SignatureChain {
            links: vec![SignatureLink {
                signer_id,
                signature: keypair.sign(&value.hash()),
            }],
        }
    }

    /// Returns a copy with one more link. The receiver's chain is untouched.
    pub fn extend(&self, signer_id: NodeId, keypair: &Keypair, value: Value) -> Self {
        let mut links = self.links.clone();
        links.push(SignatureLink {
            signer_id,
            signature: keypair.sign(&value.hash()),
        });
        SignatureChain { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.links.iter().any(|link| link.signer_id == id)
    }

    pub fn origin(&self) -> Option<NodeId> {
        self.links.first().map(|link| link.signer_id)
    }

    pub fn last_signer(&self) -> Option<NodeId> {
        self.links.last().map(|link| link.signer_id)
    }

    pub fn signer_ids(&self) -> Vec<NodeId> {
        self.links.iter().map(|link| link.signer_id).collect()
    }

    /// Walks the chain in order and stops at the first repeated signer or
    /// bad signature.
    pub fn verify(&self, value: Value, roster: &Roster) -> ChainResult<()> {
        if self.is_empty() {
            return Err(ChainError::Empty);
        }

        let digest = value.hash();
        let mut seen = HashSet::with_capacity(self.links.len());
        for link in &self.links {
            if !seen.insert(link.signer_id) {
                return Err(ChainError::DuplicateSigner {
                    signer: link.signer_id,
                });
            }

            let pubkey = roster
                .pubkey(link.signer_id)
                .ok_or(ChainError::UnknownSigner {
                    signer: link.signer_id,
                })?;

            if !pubkey.verify(&digest, &link.signature) {
                return Err(ChainError::InvalidSignature {
                    signer: link.signer_id,
                });
            }
        }

        Ok(())
    }

    /// Protocol-level check for a round-`round` flooding message: exactly
    /// `round + 1` links, rooted at the general, every link valid.
    pub fn verify_for_round(
        &self,
        value: Value,
        round: Round,
        general: NodeId,
        roster: &Roster,
    ) -> ChainResult<()> {
        let expected = round as usize + 1;
        if self.len() != expected {
            return Err(ChainError::LengthMismatch {
                round,
                expected,
                got: self.len(),
            });
        }
        match self.origin() {
            Some(signer) if signer != general => {
                return Err(ChainError::WrongOrigin { signer, general })
            }
            _ => {}
        }
        self.verify(value, roster)
    }
}

/// Boolean form of [`SignatureChain::verify`]: true only when every link is
/// from a distinct known signer and verifies over `value`.
pub fn validate(value: Value, chain: &SignatureChain, roster: &Roster) -> bool {
    chain.verify(value, roster).is_ok()
}

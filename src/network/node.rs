use rand::{CryptoRng, RngCore};

use crate::{
    agreement::{NodeId, NodeIdentity},
    common::crypto::Keypair,
};

/// A participant before it starts: its signing key and public identity.
#[derive(Debug)]
pub struct Node {
    pub keypair: Keypair,
    pub identity: NodeIdentity,
}

impl Node {
    pub fn generate<R: RngCore + CryptoRng>(id: NodeId, rng: &mut R) -> Self {
        let keypair = Keypair::from_rng(rng);
        let identity = NodeIdentity::new(id, keypair.pubkey());
        Node { keypair, identity }
    }
}

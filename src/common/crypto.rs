use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

pub type Digest = [u8; 64];

pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Pubkey {
    pub key: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Signature {
    pub sig: [u8; 64],
}

impl Keypair {
    pub fn new_pair() -> Self {
        Self::from_rng(&mut OsRng)
    }

    /// Draws a keypair from the given generator. A seeded generator gives the
    /// same identities on every run.
    pub fn from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let dalek_signer = SigningKey::generate(rng);
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());

        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        let sig = self.dalek_signer.sign(digest).to_bytes();
        Signature { sig }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey.clone()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey)
            .finish_non_exhaustive()
    }
}

impl Pubkey {
    /// Pure check of `signature` over `digest`. A key that does not decode to a
    /// curve point fails verification instead of panicking.
    pub fn verify(&self, digest: &Digest, signature: &Signature) -> bool {
        let Ok(dalek_pubkey) = VerifyingKey::from_bytes(&self.key) else {
            return false;
        };
        let dalek_sig = DalekSignature::from_bytes(&signature.sig);
        dalek_pubkey.verify_strict(digest, &dalek_sig).is_ok()
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

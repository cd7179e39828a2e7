use aes_gcm::{
   aead::{Aead, KeyInit, Payload},
   Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::StorageError;

const SEAL_INFO: &[u8] = b"cipherline-at-rest";
const NONCE_LEN: usize = 12;

/// Ciphertext plus the nonce it was sealed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
   pub nonce: Vec<u8>,
   pub ciphertext: Vec<u8>,
}

/// Seals key material with AES-256-GCM under a per-owner key
pub struct Sealer {
   device_secret: Zeroizing<[u8; 32]>,
}

impl Sealer {
   pub fn new(device_secret: [u8; 32]) -> Self {
      Self {
         device_secret: Zeroizing::new(device_secret),
      }
   }

   /// Derive the owner's sealing key using HKDF
   fn owner_key(&self, owner: &str) -> Result<Zeroizing<[u8; 32]>, StorageError> {
      let hk = Hkdf::<Sha256>::new(Some(owner.as_bytes()), &self.device_secret[..]);
      let mut key = Zeroizing::new([0u8; 32]);
      hk.expand(SEAL_INFO, &mut key[..]).map_err(|_| StorageError::Seal)?;
      Ok(key)
   }

   /// Encrypt `plaintext` for `owner`, binding it to `context` as associated data
   pub fn seal(&self, owner: &str, context: &str, plaintext: &[u8]) -> Result<SealedBlob, StorageError> {
      let key = self.owner_key(owner)?;

      let mut nonce_bytes = [0u8; NONCE_LEN];
      rand::thread_rng().fill_bytes(&mut nonce_bytes);
      let nonce = Nonce::from_slice(&nonce_bytes);

      let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| StorageError::Seal)?;
      let ciphertext = cipher
         .encrypt(
            nonce,
            Payload {
               msg: plaintext,
               aad: context.as_bytes(),
            },
         )
         .map_err(|_| StorageError::Seal)?;

      Ok(SealedBlob {
         nonce: nonce_bytes.to_vec(),
         ciphertext,
      })
   }

   /// Decrypt a blob sealed by [`Sealer::seal`] with the same owner and context
   pub fn open(&self, owner: &str, context: &str, sealed: &SealedBlob) -> Result<Vec<u8>, StorageError> {
      if sealed.nonce.len() != NONCE_LEN {
         return Err(StorageError::Unseal(context.to_string()));
      }
      let key = self.owner_key(owner)?;
      let nonce = Nonce::from_slice(&sealed.nonce);

      let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| StorageError::Seal)?;
      cipher
         .decrypt(
            nonce,
            Payload {
               msg: &sealed.ciphertext,
               aad: context.as_bytes(),
            },
         )
         .map_err(|_| StorageError::Unseal(context.to_string()))
   }
}

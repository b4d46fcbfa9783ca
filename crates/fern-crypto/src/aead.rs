//! AEAD primitive: AES-128-GCM with a truncated tag

use aes_gcm::{
    aead::{
        consts::{U12, U4},
        Aead, KeyInit, Payload,
    },
    aes::Aes128,
    AesGcm, Nonce,
};

use fern_core::{MeshError, MeshResult};
use fern_wire::{NONCE_SIZE, TAG_SIZE};

/// Pre-shared link key size (AES-128).
pub const KEY_SIZE: usize = 16;

/// AES-128-GCM, 96-bit nonce, 32-bit tag.
type LinkAead = AesGcm<Aes128, U12, U4>;

/// AEAD cipher over the mesh's pre-shared key.
///
/// GCM nonce reuse under one key is catastrophic; callers must draw every
/// nonce from a true random source, never a counter that resets across
/// reboots.
pub struct LinkCipher {
    cipher: LinkAead,
}

impl LinkCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> MeshResult<Self> {
        let cipher = LinkAead::new_from_slice(key)
            .map_err(|_| MeshError::CipherSetup("invalid key length"))?;
        Ok(LinkCipher { cipher })
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it. Returns the
    /// ciphertext (same length as the plaintext) and the detached tag.
    pub fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> MeshResult<(Vec<u8>, [u8; TAG_SIZE])> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let mut sealed = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| MeshError::CipherSetup("encryption failed"))?;

        // The aead API appends the tag; the wire carries it detached.
        let tag_start = sealed.len() - TAG_SIZE;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&sealed[tag_start..]);
        sealed.truncate(tag_start);
        Ok((sealed, tag))
    }

    /// Verify and decrypt. Tag verification failure is indistinguishable
    /// from any other corruption: the frame fails closed.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
    ) -> MeshResult<Vec<u8>> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        self.cipher
            .decrypt(nonce, Payload { msg: &sealed, aad })
            .map_err(|_| MeshError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = LinkCipher::new(&KEY).unwrap();
        let nonce = [7u8; NONCE_SIZE];
        let aad = [3u8, 1u8];
        let plaintext = b"sensor sample bytes";

        let (ciphertext, tag) = cipher.seal(&nonce, &aad, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());

        let opened = cipher.open(&nonce, &aad, &ciphertext, &tag).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = LinkCipher::new(&KEY).unwrap();
        let other = LinkCipher::new(&[0x43; KEY_SIZE]).unwrap();
        let nonce = [1u8; NONCE_SIZE];

        let (ciphertext, tag) = cipher.seal(&nonce, b"", b"secret").unwrap();
        assert!(other.open(&nonce, b"", &ciphertext, &tag).is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let cipher = LinkCipher::new(&KEY).unwrap();
        let nonce = [1u8; NONCE_SIZE];

        let (ciphertext, tag) = cipher.seal(&nonce, &[3, 1], b"secret").unwrap();
        let result = cipher.open(&nonce, &[3, 2], &ciphertext, &tag);
        assert!(matches!(result, Err(MeshError::AuthFailed)));
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = LinkCipher::new(&KEY).unwrap();
        let nonce = [9u8; NONCE_SIZE];

        let (ciphertext, tag) = cipher.seal(&nonce, b"aad", b"").unwrap();
        assert!(ciphertext.is_empty());
        assert_eq!(cipher.open(&nonce, b"aad", &ciphertext, &tag).unwrap(), b"");
    }
}

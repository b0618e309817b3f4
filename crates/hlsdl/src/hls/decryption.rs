// HLS Decryption Stage: streaming AES-128-CBC decryption of segment bodies.

use aes::Aes128;
use bytes::{Bytes, BytesMut};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use tracing::trace;

use crate::error::DownloadError;
use crate::hls::pipeline::ByteStage;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// IV used when a key tag carries none.
pub const ZERO_IV: [u8; 16] = [0; 16];

/// Streaming AES-128-CBC decryptor.
///
/// Complete ciphertext blocks are decrypted as they arrive, except for the
/// most recent one, which is held back until [`ByteStage::finish`] so its
/// PKCS#7 padding can be stripped.
pub struct Aes128CbcDecryptor {
    cipher: Option<Aes128CbcDec>,
    pending: BytesMut,
    consumed: usize,
}

impl Aes128CbcDecryptor {
    pub fn new(key: &[u8], iv: Option<[u8; 16]>) -> Result<Self, DownloadError> {
        let iv = iv.unwrap_or(ZERO_IV);
        let cipher = Aes128CbcDec::new_from_slices(key, &iv).map_err(|_| {
            DownloadError::decryption(format!(
                "invalid AES-128 key length: expected 16 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self {
            cipher: Some(cipher),
            pending: BytesMut::new(),
            consumed: 0,
        })
    }

    fn cipher_mut(&mut self) -> Result<&mut Aes128CbcDec, DownloadError> {
        self.cipher
            .as_mut()
            .ok_or_else(|| DownloadError::decryption("decryptor already finished"))
    }
}

impl ByteStage for Aes128CbcDecryptor {
    fn name(&self) -> &'static str {
        "aes-128-cbc"
    }

    fn process(
        &mut self,
        chunk: Bytes,
        output: &mut dyn FnMut(Bytes) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        self.pending.extend_from_slice(&chunk);
        if self.pending.len() <= BLOCK_SIZE {
            return Ok(());
        }

        // Always keep between 1 and 16 bytes back; the final block is only known at finish.
        let ready = ((self.pending.len() - 1) / BLOCK_SIZE) * BLOCK_SIZE;
        let mut blocks = self.pending.split_to(ready);
        let cipher = self.cipher_mut()?;
        for block in blocks.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        self.consumed += ready;
        output(blocks.freeze())
    }

    fn finish(
        &mut self,
        output: &mut dyn FnMut(Bytes) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        let total = self.consumed + self.pending.len();
        if total == 0 {
            return Err(DownloadError::decryption("empty ciphertext"));
        }
        if self.pending.len() != BLOCK_SIZE {
            return Err(DownloadError::decryption(format!(
                "ciphertext length {total} is not a multiple of {BLOCK_SIZE}"
            )));
        }

        let cipher = self
            .cipher
            .take()
            .ok_or_else(|| DownloadError::decryption("decryptor already finished"))?;
        let mut last = std::mem::take(&mut self.pending);
        let plain_len = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut last)
            .map_err(|e| DownloadError::decryption(format!("invalid PKCS#7 padding: {e}")))?
            .len();
        last.truncate(plain_len);
        trace!(ciphertext_len = total, "Segment decrypted");

        if last.is_empty() {
            Ok(())
        } else {
            output(last.freeze())
        }
    }
}

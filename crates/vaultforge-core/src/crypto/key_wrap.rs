//! AES key wrapping per [RFC 3394].
//!
//! The wrap construction is deterministic and authenticated: no nonce, and
//! a 64-bit integrity register that only reconstructs correctly under the
//! key encryption key the data was wrapped with. A failed integrity check
//! on unwrap is therefore the "wrong password" signal for a vault whose KEK
//! is derived from a passphrase.
//!
//! [RFC 3394]: https://datatracker.ietf.org/doc/html/rfc3394

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use generic_array::GenericArray;
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// IV from RFC 3394 section 2.2.3.1.
const IV_3394: u64 = 0xa6a6a6a6a6a6a6a6;

#[derive(Error, Debug)]
pub enum WrapError {
    #[error("The plaintext length is not a non-zero multiple of 64 bits per RFC 3394")]
    InvalidPlaintextLength,
}

#[derive(Error, Debug)]
pub enum UnwrapError {
    #[error("The ciphertext length is not a multiple of 64 bits per RFC 3394")]
    InvalidCiphertextLength,

    #[error("The ciphertext is too short to contain wrapped key data")]
    CiphertextTooShort,

    #[error("The integrity check failed")]
    InvalidIntegrityCheck,
}

/// Wrap a key under the key encryption key (KEK).
///
/// The plaintext must be a non-zero multiple of 8 bytes; the output is
/// 8 bytes longer than the input (the integrity block).
pub fn wrap_key(plaintext: &[u8], kek: &SecretBox<[u8; 32]>) -> Result<Vec<u8>, WrapError> {
    if plaintext.is_empty() || plaintext.len() % 8 != 0 {
        return Err(WrapError::InvalidPlaintextLength);
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek.expose_secret()));
    let n_blocks = plaintext.len() / 8;

    // A: the 64-bit integrity check register; R: n 64-bit registers
    let mut integrity_check = IV_3394;
    let mut registers = Zeroizing::new(plaintext.to_vec());

    let mut block = aes::Block::default();
    for j in 0..6 {
        for (i, chunk) in registers.chunks_mut(8).enumerate() {
            // B = AES(K, A | R[i]); A = MSB64(B) ^ t; R[i] = LSB64(B)
            let t = (n_blocks * j + i + 1) as u64;
            block[..8].copy_from_slice(&integrity_check.to_be_bytes());
            block[8..].copy_from_slice(chunk);
            cipher.encrypt_block(&mut block);
            integrity_check = u64::from_be_bytes(block[..8].try_into().unwrap()) ^ t;
            chunk.copy_from_slice(&block[8..]);
        }
    }
    block.zeroize();

    let mut ciphertext = Vec::with_capacity(8 + registers.len());
    ciphertext.extend_from_slice(&integrity_check.to_be_bytes());
    ciphertext.extend_from_slice(&registers);
    Ok(ciphertext)
}

/// Unwrap a key under the key encryption key (KEK).
///
/// Fails with [`UnwrapError::InvalidIntegrityCheck`] when the embedded
/// checksum does not reconstruct — the KEK is wrong (typically a wrong
/// passphrase) or the ciphertext was tampered with.
pub fn unwrap_key(
    ciphertext: &[u8],
    kek: &SecretBox<[u8; 32]>,
) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
    if ciphertext.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength);
    }
    if ciphertext.len() < 24 {
        // integrity block + at least two key data blocks
        return Err(UnwrapError::CiphertextTooShort);
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek.expose_secret()));
    let n_blocks = ciphertext.len() / 8 - 1;

    let mut integrity_check = u64::from_be_bytes(ciphertext[..8].try_into().unwrap());
    let mut registers = Zeroizing::new(ciphertext[8..].to_vec());

    let mut block = aes::Block::default();
    for j in (0..6).rev() {
        for (i, chunk) in registers.chunks_mut(8).enumerate().rev() {
            // B = AES^-1(K, (A ^ t) | R[i]); A = MSB64(B); R[i] = LSB64(B)
            let t = (n_blocks * j + i + 1) as u64;
            block[..8].copy_from_slice(&(integrity_check ^ t).to_be_bytes());
            block[8..].copy_from_slice(chunk);
            cipher.decrypt_block(&mut block);
            integrity_check = u64::from_be_bytes(block[..8].try_into().unwrap());
            chunk.copy_from_slice(&block[8..]);
        }
    }
    block.zeroize();

    if integrity_check != IV_3394 {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }

    Ok(registers)
}

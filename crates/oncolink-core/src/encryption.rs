//! Streaming authenticated encryption for documents at rest.
//!
//! Wire format:
//!
//! ```text
//! base_nonce (12 bytes) || chunk_0 || chunk_1 || ... || chunk_n
//! chunk_i = AES-256-GCM(plaintext_i, nonce_i), plaintext_i <= 64 KiB, 16-byte tag appended
//! ```
//!
//! Every chunk is sealed under its own nonce: the counter `i` is XORed big-endian into bytes
//! 7..11 of the base nonce and byte 11 carries a last-chunk flag. Reordering, dropping, or
//! appending chunks therefore breaks authentication, and so does any change to the base nonce.
//! An empty plaintext still produces one (empty, final) chunk so truncation to the bare
//! header is detectable.

use std::fmt;
use std::io;
use std::pin::Pin;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures::stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::error::AppError;

/// Boxed streaming reader passed between storage, encryption, and the pipeline.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

pub const NONCE_LEN: usize = 12;
pub const CHUNK_SIZE: usize = 64 * 1024;
pub const TAG_LEN: usize = 16;

const SEALED_CHUNK_LEN: usize = CHUNK_SIZE + TAG_LEN;
const LAST_CHUNK_FLAG: u8 = 0x01;

/// AES-256-GCM stream cipher keyed by the caller. Never generates or stores keys.
#[derive(Clone)]
pub struct SecureStream {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureStream { key: <redacted> }")
    }
}

impl SecureStream {
    /// Create from a raw 32-byte key.
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, AppError> {
        if key_bytes.len() != 32 {
            return Err(AppError::Internal(
                "Encryption key must be 32 bytes (256 bits)".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Create from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, AppError> {
        let key_bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("Failed to decode encryption key: {}", e)))?;
        Self::from_key_bytes(&key_bytes)
    }

    /// Wrap `plaintext` so that reading yields the nonce header followed by sealed chunks.
    pub fn encrypt_stream<R>(&self, plaintext: R) -> ByteReader
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let state = ChunkState {
            reader: plaintext,
            cipher: self.cipher.clone(),
            base_nonce: None,
            counter: 0,
            carry: None,
            finished: false,
        };

        let chunks = stream::try_unfold(state, |mut state| async move {
            if state.finished {
                return Ok(None);
            }
            let base_nonce = match state.base_nonce {
                Some(nonce) => nonce,
                None => {
                    let generated = Aes256Gcm::generate_nonce(&mut OsRng);
                    let mut nonce = [0u8; NONCE_LEN];
                    nonce.copy_from_slice(generated.as_slice());
                    state.base_nonce = Some(nonce);
                    return Ok(Some((Bytes::copy_from_slice(&nonce), state)));
                }
            };

            let (chunk, last) = read_chunk(&mut state.reader, &mut state.carry, CHUNK_SIZE).await?;
            let nonce = chunk_nonce(&base_nonce, state.counter, last);
            let sealed = state
                .cipher
                .encrypt(Nonce::from_slice(&nonce), chunk.as_slice())
                .map_err(|_| io::Error::other("chunk encryption failed"))?;

            state.finished = last;
            state.counter = next_counter(state.counter, last)?;
            Ok::<_, io::Error>(Some((Bytes::from(sealed), state)))
        });

        Box::pin(StreamReader::new(Box::pin(chunks)))
    }

    /// Wrap `ciphertext` so that reading yields the authenticated plaintext.
    ///
    /// Authentication failures surface as `io::ErrorKind::InvalidData`; use
    /// [`read_error_to_app`] to classify them.
    pub fn decrypt_stream<R>(&self, ciphertext: R) -> ByteReader
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let state = ChunkState {
            reader: ciphertext,
            cipher: self.cipher.clone(),
            base_nonce: None,
            counter: 0,
            carry: None,
            finished: false,
        };

        let chunks = stream::try_unfold(state, |mut state| async move {
            if state.finished {
                return Ok(None);
            }
            let base_nonce = match state.base_nonce {
                Some(nonce) => nonce,
                None => {
                    let mut nonce = [0u8; NONCE_LEN];
                    let read = read_full(&mut state.reader, &mut nonce).await?;
                    if read < NONCE_LEN {
                        return Err(integrity_error("ciphertext shorter than nonce header"));
                    }
                    state.base_nonce = Some(nonce);
                    nonce
                }
            };

            let (sealed, last) =
                read_chunk(&mut state.reader, &mut state.carry, SEALED_CHUNK_LEN).await?;
            if sealed.len() < TAG_LEN {
                return Err(integrity_error("truncated ciphertext chunk"));
            }
            let nonce = chunk_nonce(&base_nonce, state.counter, last);
            let plaintext = state
                .cipher
                .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
                .map_err(|_| integrity_error("chunk authentication failed"))?;

            state.finished = last;
            state.counter = next_counter(state.counter, last)?;
            Ok::<_, io::Error>(Some((Bytes::from(plaintext), state)))
        });

        Box::pin(StreamReader::new(Box::pin(chunks)))
    }

    /// Decrypt a whole ciphertext stream into memory.
    pub async fn decrypt_to_vec<R>(&self, ciphertext: R) -> Result<Vec<u8>, AppError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader = self.decrypt_stream(ciphertext);
        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .await
            .map_err(read_error_to_app)?;
        Ok(plaintext)
    }
}

/// Classify an I/O error raised while reading a decrypting stream.
pub fn read_error_to_app(err: io::Error) -> AppError {
    if err.kind() == io::ErrorKind::InvalidData {
        AppError::Integrity(err.to_string())
    } else {
        AppError::data_access("reading encrypted stream", err)
    }
}

struct ChunkState<R> {
    reader: R,
    cipher: Aes256Gcm,
    base_nonce: Option<[u8; NONCE_LEN]>,
    counter: u32,
    carry: Option<u8>,
    finished: bool,
}

fn chunk_nonce(base: &[u8; NONCE_LEN], counter: u32, last: bool) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (byte, c) in nonce[7..11].iter_mut().zip(counter.to_be_bytes()) {
        *byte ^= c;
    }
    if last {
        nonce[11] ^= LAST_CHUNK_FLAG;
    }
    nonce
}

fn next_counter(counter: u32, last: bool) -> io::Result<u32> {
    if last {
        return Ok(counter);
    }
    counter
        .checked_add(1)
        .ok_or_else(|| io::Error::other("stream exceeds maximum chunk count"))
}

fn integrity_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Read one chunk of at most `size` bytes, probing one byte ahead to learn whether it is the last.
async fn read_chunk<R>(
    reader: &mut R,
    carry: &mut Option<u8>,
    size: usize,
) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    if let Some(byte) = carry.take() {
        buf[0] = byte;
        filled = 1;
    }
    filled += read_full(reader, &mut buf[filled..]).await?;

    let last = if filled < size {
        true
    } else {
        let mut probe = [0u8; 1];
        match read_full(reader, &mut probe).await? {
            0 => true,
            _ => {
                *carry = Some(probe[0]);
                false
            }
        }
    };

    buf.truncate(filled);
    Ok((buf, last))
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

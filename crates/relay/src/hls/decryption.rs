// Segment decryption: AES-128-CBC with keys fetched once per key URI.

use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use m3u8_rs::KeyMethod;
use moka::future::Cache;
use tracing::{debug, trace};
use url::Url;

use crate::hls::HlsError;
use crate::hls::fetcher::SegmentDownloader;
use crate::hls::playlist::SegmentEncryption;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// IV used when the manifest does not declare one.
pub const DEFAULT_IV: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xF6];

pub struct DecryptionService {
    keys: Cache<String, Bytes>,
    fetcher: Arc<dyn SegmentDownloader>,
}

impl DecryptionService {
    pub fn new(fetcher: Arc<dyn SegmentDownloader>, key_cache_capacity: u64) -> Self {
        Self {
            keys: Cache::new(key_cache_capacity),
            fetcher,
        }
    }

    pub fn has_cached_key(&self, key_uri: &str) -> bool {
        self.keys.contains_key(key_uri)
    }

    /// Decrypt one segment. Errors for which [`HlsError::is_fatal`] holds
    /// end the session; anything else only skips this segment.
    pub async fn decrypt(&self, data: Bytes, encryption: &SegmentEncryption) -> Result<Bytes, HlsError> {
        match &encryption.method {
            KeyMethod::None => return Ok(data),
            KeyMethod::AES128 => {}
            other => {
                return Err(HlsError::Decryption(format!(
                    "Unsupported decryption method: {other:?}"
                )));
            }
        }

        let key_uri = encryption
            .key_uri
            .as_deref()
            .ok_or_else(|| HlsError::Decryption("Key URI is missing".to_string()))?;
        check_key_protocol(key_uri)?;

        let iv = match &encryption.iv {
            Some(iv) => parse_iv(iv)?,
            None => DEFAULT_IV,
        };
        let key = self.key(key_uri).await?;
        decrypt_cbc(&data, &key, &iv)
    }

    async fn key(&self, key_uri: &str) -> Result<Bytes, HlsError> {
        let fetcher = Arc::clone(&self.fetcher);
        self.keys
            .try_get_with(key_uri.to_string(), async move {
                debug!(uri = key_uri, "Fetching decryption key");
                let key = fetcher.download(key_uri).await?;
                if key.len() != BLOCK_SIZE {
                    return Err(HlsError::Decryption(format!(
                        "Key from {key_uri} is {} bytes, expected 16",
                        key.len()
                    )));
                }
                Ok(key)
            })
            .await
            .map_err(|e: Arc<HlsError>| (*e).clone())
    }
}

fn check_key_protocol(key_uri: &str) -> Result<(), HlsError> {
    match Url::parse(key_uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(HlsError::UnsupportedKeyProtocol {
            uri: key_uri.to_string(),
        }),
    }
}

fn parse_iv(iv_hex: &str) -> Result<[u8; 16], HlsError> {
    let digits = iv_hex
        .strip_prefix("0x")
        .or_else(|| iv_hex.strip_prefix("0X"))
        .unwrap_or(iv_hex);
    // short IVs are left-padded, as the attribute is a hexadecimal integer
    let padded = format!("{digits:0>32}");
    let mut iv = [0u8; 16];
    hex::decode_to_slice(&padded, &mut iv)
        .map_err(|e| HlsError::Decryption(format!("Failed to parse IV '{iv_hex}': {e}")))?;
    Ok(iv)
}

fn decrypt_cbc(data: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Bytes, HlsError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(HlsError::Decryption(format!(
            "Ciphertext length {} is not a multiple of the block size",
            data.len()
        )));
    }
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| HlsError::Decryption(format!("Failed to initialize AES decryptor: {e}")))?;

    let mut buffer = data.to_vec();
    let plain_len = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|e| HlsError::Decryption(format!("Decryption failed: {e}")))?
        .len();
    buffer.truncate(unpadded_len(&buffer[..plain_len]));
    trace!(bytes = buffer.len(), "Segment decrypted");
    Ok(Bytes::from(buffer))
}

/// Length without PKCS#7 padding, or the full length if the tail is not
/// valid padding.
fn unpadded_len(plain: &[u8]) -> usize {
    let Some(&pad) = plain.last() else {
        return 0;
    };
    let pad = pad as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > plain.len() {
        return plain.len();
    }
    if plain[plain.len() - pad..].iter().all(|&b| b as usize == pad) {
        plain.len() - pad
    } else {
        plain.len()
    }
}

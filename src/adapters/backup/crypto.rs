//! Archive encryption: Argon2id key derivation + XChaCha20-Poly1305 framing.
//!
//! Payload files are sealed frame by frame so decryption streams in bounded
//! memory. Password checks go through a sealed verifier blob in the manifest,
//! so a wrong password fails fast without touching any payload file.

use crate::adapters::backup::archive::{ArchiveManifest, ENC_SUFFIX, KdfParams};
use crate::domain::SyncError;
use crate::ports::ArchiveCrypto;
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Argon2id defaults (OWASP interactive profile).
pub const DEFAULT_M_COST: u32 = 65536;
pub const DEFAULT_T_COST: u32 = 3;
pub const DEFAULT_P_COST: u32 = 4;

/// File magic for sealed payloads.
const MAGIC: &[u8; 6] = b"PSARC1";
/// Per-file random nonce prefix; the frame counter fills the remaining 8 bytes
/// of the 24-byte XChaCha nonce.
const NONCE_PREFIX_LEN: usize = 16;
/// Plaintext bytes per frame.
const FRAME_LEN: usize = 1024 * 1024;
/// Known plaintext sealed into the manifest for password verification.
const VERIFIER: &[u8] = b"phone-sync archive v1";

/// 256-bit archive key. Wiped on drop, redacted in Debug.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ArchiveKey([u8; 32]);

impl std::fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArchiveKey([REDACTED])")
    }
}

pub fn generate_salt() -> String {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    B64.encode(salt)
}

pub fn derive_key(password: &str, kdf: &KdfParams) -> Result<ArchiveKey, SyncError> {
    let salt = B64
        .decode(&kdf.salt_b64)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("kdf salt invalid: {e}")))?;
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(32))
        .map_err(|e| SyncError::ArchiveCorrupt(format!("kdf params invalid: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon
        .hash_password_into(password.as_bytes(), &salt, &mut key)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("key derivation failed: {e}")))?;
    Ok(ArchiveKey(key))
}

pub fn seal_verifier(key: &ArchiveKey) -> Result<String, SyncError> {
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let ct = cipher
        .encrypt(XNonce::from_slice(&nonce), VERIFIER)
        .map_err(|_| SyncError::ArchiveCorrupt("verifier seal failed".into()))?;
    let mut blob = nonce.to_vec();
    blob.extend_from_slice(&ct);
    Ok(B64.encode(blob))
}

/// True iff `key` opens the verifier. Tamper and wrong-password both come back
/// as `false`; they are indistinguishable under AEAD.
pub fn open_verifier(key: &ArchiveKey, verifier_b64: &str) -> Result<bool, SyncError> {
    let blob = B64
        .decode(verifier_b64)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("verifier invalid: {e}")))?;
    if blob.len() < 24 {
        return Err(SyncError::ArchiveCorrupt("verifier truncated".into()));
    }
    let (nonce, ct) = blob.split_at(24);
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    match cipher.decrypt(XNonce::from_slice(nonce), ct) {
        Ok(plain) => Ok(plain == VERIFIER),
        Err(_) => Ok(false),
    }
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u64) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

pub fn encrypt_file(key: &ArchiveKey, src: &Path, dest: &Path) -> Result<(), SyncError> {
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let mut reader = std::fs::File::open(src)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("open {}: {e}", src.display())))?;
    let mut writer = std::fs::File::create(dest)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("create {}: {e}", dest.display())))?;

    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    OsRng.fill_bytes(&mut prefix);
    writer
        .write_all(MAGIC)
        .and_then(|_| writer.write_all(&prefix))
        .map_err(|e| SyncError::ArchiveCorrupt(format!("write header: {e}")))?;

    let mut buf = vec![0u8; FRAME_LEN];
    let mut counter: u64 = 0;
    loop {
        let n = read_full(&mut reader, &mut buf)
            .map_err(|e| SyncError::ArchiveCorrupt(format!("read {}: {e}", src.display())))?;
        if n == 0 {
            break;
        }
        let nonce = frame_nonce(&prefix, counter);
        let ct = cipher
            .encrypt(XNonce::from_slice(&nonce), &buf[..n])
            .map_err(|_| SyncError::ArchiveCorrupt("frame seal failed".into()))?;
        let len = u32::try_from(ct.len())
            .map_err(|_| SyncError::ArchiveCorrupt("frame too large".into()))?;
        writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| writer.write_all(&ct))
            .map_err(|e| SyncError::ArchiveCorrupt(format!("write frame: {e}")))?;
        counter += 1;
    }
    buf.zeroize();
    writer
        .flush()
        .map_err(|e| SyncError::ArchiveCorrupt(format!("flush {}: {e}", dest.display())))
}

pub fn decrypt_file(key: &ArchiveKey, src: &Path, dest: &Path) -> Result<(), SyncError> {
    let cipher = XChaCha20Poly1305::new((&key.0).into());
    let mut reader = std::fs::File::open(src)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("open {}: {e}", src.display())))?;
    let mut writer = std::fs::File::create(dest)
        .map_err(|e| SyncError::ArchiveCorrupt(format!("create {}: {e}", dest.display())))?;

    let mut magic = [0u8; MAGIC.len()];
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    reader
        .read_exact(&mut magic)
        .and_then(|_| reader.read_exact(&mut prefix))
        .map_err(|e| SyncError::ArchiveCorrupt(format!("read header: {e}")))?;
    if &magic != MAGIC {
        return Err(SyncError::ArchiveCorrupt(format!(
            "{}: bad magic",
            src.display()
        )));
    }

    let mut counter: u64 = 0;
    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(SyncError::ArchiveCorrupt(format!("read frame length: {e}")));
            }
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 || len > FRAME_LEN + 64 {
            return Err(SyncError::ArchiveCorrupt(format!(
                "frame {counter} length {len} out of range"
            )));
        }
        let mut ct = vec![0u8; len];
        reader
            .read_exact(&mut ct)
            .map_err(|e| SyncError::ArchiveCorrupt(format!("read frame {counter}: {e}")))?;
        let nonce = frame_nonce(&prefix, counter);
        let mut plain = cipher
            .decrypt(XNonce::from_slice(&nonce), ct.as_slice())
            .map_err(|_| SyncError::ArchiveCorrupt(format!("frame {counter} failed to open")))?;
        writer
            .write_all(&plain)
            .map_err(|e| SyncError::ArchiveCorrupt(format!("write {}: {e}", dest.display())))?;
        plain.zeroize();
        counter += 1;
    }
    writer
        .flush()
        .map_err(|e| SyncError::ArchiveCorrupt(format!("flush {}: {e}", dest.display())))
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Production `ArchiveCrypto`. Key derivation and file framing run on the
/// blocking pool; both are CPU/IO heavy.
pub struct ArchiveCipher;

impl ArchiveCipher {
    pub fn new() -> Self {
        Self
    }

    fn load_encrypted_manifest(dir: &Path) -> Result<(ArchiveManifest, KdfParams, String), SyncError> {
        let manifest = ArchiveManifest::load(dir)?;
        if !manifest.encrypted {
            return Err(SyncError::ArchiveCorrupt(
                "archive is not encrypted".into(),
            ));
        }
        let kdf = manifest
            .kdf
            .clone()
            .ok_or_else(|| SyncError::ArchiveCorrupt("encrypted archive missing kdf".into()))?;
        let verifier = manifest
            .verifier_b64
            .clone()
            .ok_or_else(|| SyncError::ArchiveCorrupt("encrypted archive missing verifier".into()))?;
        Ok((manifest, kdf, verifier))
    }
}

impl Default for ArchiveCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveCrypto for ArchiveCipher {
    async fn verify_password(&self, archive_dir: &Path, password: &str) -> Result<bool, SyncError> {
        let manifest = ArchiveManifest::load(archive_dir)?;
        if !manifest.encrypted {
            return Ok(true);
        }
        let kdf = manifest
            .kdf
            .ok_or_else(|| SyncError::ArchiveCorrupt("encrypted archive missing kdf".into()))?;
        let verifier = manifest
            .verifier_b64
            .ok_or_else(|| SyncError::ArchiveCorrupt("encrypted archive missing verifier".into()))?;
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let key = derive_key(&password, &kdf)?;
            open_verifier(&key, &verifier)
        })
        .await
        .map_err(|e| SyncError::ArchiveCorrupt(format!("verification task failed: {e}")))?
    }

    async fn decrypt(&self, archive_dir: &Path, password: &str) -> Result<(), SyncError> {
        let dir = archive_dir.to_path_buf();
        let (mut manifest, kdf, verifier) = Self::load_encrypted_manifest(&dir)?;
        debug!(archive = %dir.display(), files = manifest.files.len(), "decrypting archive");

        let password_owned = password.to_owned();
        let sealed_names: Vec<String> = manifest
            .files
            .iter()
            .filter(|f| f.encrypted)
            .map(|f| f.name.clone())
            .collect();
        let work_dir = dir.clone();
        tokio::task::spawn_blocking(move || {
            let key = derive_key(&password_owned, &kdf)?;
            if !open_verifier(&key, &verifier)? {
                return Err(SyncError::PasswordInvalid);
            }
            for name in &sealed_names {
                let sealed = work_dir.join(format!("{name}{ENC_SUFFIX}"));
                let plain = work_dir.join(name);
                decrypt_file(&key, &sealed, &plain)?;
                std::fs::remove_file(&sealed).map_err(|e| {
                    SyncError::ArchiveCorrupt(format!("remove {}: {e}", sealed.display()))
                })?;
            }
            Ok(())
        })
        .await
        .map_err(|e| SyncError::ArchiveCorrupt(format!("decryption task failed: {e}")))??;

        manifest.encrypted = false;
        manifest.kdf = None;
        manifest.verifier_b64 = None;
        for f in &mut manifest.files {
            f.encrypted = false;
        }
        manifest.save(&dir)?;
        info!(archive = %dir.display(), "archive decrypted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_kdf() -> KdfParams {
        KdfParams {
            salt_b64: generate_salt(),
            m_cost: 8192,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn verifier_accepts_right_password_only() {
        let kdf = light_kdf();
        let key = derive_key("hunter2", &kdf).unwrap();
        let verifier = seal_verifier(&key).unwrap();
        assert!(open_verifier(&key, &verifier).unwrap());

        let wrong = derive_key("hunter3", &kdf).unwrap();
        assert!(!open_verifier(&wrong, &verifier).unwrap());
    }

    #[test]
    fn file_roundtrip_multi_frame() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("payload.bin");
        let sealed = dir.path().join("payload.bin.enc");
        let restored = dir.path().join("restored.bin");

        // Spans two frames plus a partial third.
        let data: Vec<u8> = (0..(2 * FRAME_LEN + 777)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&plain, &data).unwrap();

        let key = derive_key("pw", &light_kdf()).unwrap();
        encrypt_file(&key, &plain, &sealed).unwrap();
        decrypt_file(&key, &sealed, &restored).unwrap();

        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[test]
    fn tampered_frame_is_archive_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("payload.bin");
        let sealed = dir.path().join("payload.bin.enc");
        std::fs::write(&plain, b"some payload bytes").unwrap();

        let key = derive_key("pw", &light_kdf()).unwrap();
        encrypt_file(&key, &plain, &sealed).unwrap();

        let mut bytes = std::fs::read(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&sealed, bytes).unwrap();

        let err = decrypt_file(&key, &sealed, &dir.path().join("out.bin")).unwrap_err();
        assert!(matches!(err, SyncError::ArchiveCorrupt(_)));
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = dir.path().join("bogus.enc");
        std::fs::write(&sealed, b"NOTPSARCxxxxxxxxxxxxxxxxxxxx").unwrap();
        let key = derive_key("pw", &light_kdf()).unwrap();
        let err = decrypt_file(&key, &sealed, &dir.path().join("out.bin")).unwrap_err();
        assert!(matches!(err, SyncError::ArchiveCorrupt(_)));
    }
}

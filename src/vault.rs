use std::path::Path;

use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

/// Fixed resource path of the sealed mail credential, relative to CWD.
pub const CREDENTIAL_PATH: &str = "mail-credential.sealed";

const KEY_CONTEXT: &[u8] = b"dchealth mail credential v1";
const NONCE_LEN: usize = 12;

/// Key bound to the running principal: hostname plus logged-in user.
/// A blob sealed on one machine/account does not open anywhere else.
fn identity_key() -> Key {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".into());
    let user = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".into());

    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update([0]);
    hasher.update(user.as_bytes());
    hasher.update([0]);
    hasher.update(KEY_CONTEXT);
    let digest = hasher.finalize();
    *Key::from_slice(digest.as_slice())
}

fn seal_with_key(key: &Key, secret: &str) -> anyhow::Result<String> {
    let cipher = ChaCha20Poly1305::new(key);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, secret.as_bytes())
        .map_err(|_| anyhow!("encryption failed"))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

fn unseal_with_key(key: &Key, encoded: &str) -> anyhow::Result<String> {
    let blob = BASE64
        .decode(encoded.trim())
        .map_err(|e| anyhow!("credential file is not valid base64: {e}"))?;
    if blob.len() <= NONCE_LEN {
        return Err(anyhow!("credential file is truncated"));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(key);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            anyhow!("could not unseal credential — was it sealed by a different user or machine?")
        })?;
    String::from_utf8(plaintext).map_err(|_| anyhow!("unsealed credential is not UTF-8"))
}

/// Seal `secret` for the current principal and write it to `path`.
pub fn seal_to_file(secret: &str, path: &Path) -> anyhow::Result<()> {
    let encoded = seal_with_key(&identity_key(), secret)?;
    std::fs::write(path, encoded)
        .map_err(|e| anyhow!("failed to write {}: {e}", path.display()))?;
    Ok(())
}

/// Read and unseal the credential at `path`. Only succeeds for the
/// principal that sealed it.
pub fn unseal_from_file(path: &Path) -> anyhow::Result<String> {
    let encoded = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    unseal_with_key(&identity_key(), &encoded)
}

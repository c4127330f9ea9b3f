//! Ansible Vault decryption
//!
//! Implements the vault payload formats 1.1 and 1.2 with the AES256 cipher:
//! PBKDF2-HMAC-SHA256 key derivation (10 000 rounds, 80 bytes of output split
//! into AES key, HMAC key, and CTR IV), HMAC-SHA256 verification over the
//! ciphertext, AES-256-CTR decryption, PKCS#7 unpadding.
//!
//! Both whole-file vaults and `!vault` tagged inventory values are supported.
//! An `encrypt` counterpart produces payloads this module (and Ansible) can
//! read; tests and fixtures use it to build encrypted inventories.

use std::fmt;
use std::path::Path;

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde_yaml::Value;
use sha2::Sha256;

use crate::error::{Error, Result};

type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const VAULT_HEADER: &str = "$ANSIBLE_VAULT";
const CIPHER: &str = "AES256";
const KDF_ROUNDS: u32 = 10_000;
const AES_BLOCK: usize = 16;

/// The label used when a `--vault-id` argument carries no explicit label.
pub const DEFAULT_VAULT_LABEL: &str = "default";

/// A single vault identity: a label and its password.
#[derive(Clone)]
pub struct VaultId {
    /// Identity label, e.g. `prod` in `prod@passwords/prod.txt`
    pub label: String,
    password: String,
}

impl fmt::Debug for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never expose the password in logs.
        f.debug_struct("VaultId")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl VaultId {
    /// Create a vault identity from a label and password.
    pub fn new(label: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            password: password.into(),
        }
    }

    /// Parse a `--vault-id` argument of the form `label@source` (a bare
    /// `source` gets the default label) and read the password from the
    /// source file. Prompt sources are not supported.
    pub fn from_arg(arg: &str) -> Result<Self> {
        let (label, source) = match arg.split_once('@') {
            Some((label, source)) => (label, source),
            None => (DEFAULT_VAULT_LABEL, arg),
        };

        if source == "prompt" || source == "prompt_ascii" {
            return Err(Error::vault(format!(
                "vault id '{arg}': prompt sources are not supported, use a password file"
            )));
        }

        let raw = std::fs::read_to_string(Path::new(source)).map_err(|e| {
            Error::vault(format!("vault id '{arg}': cannot read password file: {e}"))
        })?;
        // The password is the first line of the file.
        let password = raw.lines().next().unwrap_or_default();

        Ok(Self::new(label, password))
    }
}

/// Ordered collection of vault identities used for decryption.
#[derive(Debug, Clone, Default)]
pub struct VaultSecrets {
    secrets: Vec<VaultId>,
}

impl VaultSecrets {
    /// Build secrets from raw `--vault-id` arguments, reading each password
    /// file.
    pub fn from_vault_ids(vault_ids: &[String]) -> Result<Self> {
        let secrets = vault_ids
            .iter()
            .map(|arg| VaultId::from_arg(arg))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { secrets })
    }

    /// Add an identity.
    pub fn push(&mut self, id: VaultId) {
        self.secrets.push(id);
    }

    /// Whether any identity is configured.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Identities to try for an envelope, label matches first, then the
    /// rest in configuration order.
    fn candidates(&self, label: Option<&str>) -> Vec<&VaultId> {
        let mut ordered: Vec<&VaultId> = self
            .secrets
            .iter()
            .filter(|s| Some(s.label.as_str()) == label)
            .collect();
        ordered.extend(
            self.secrets
                .iter()
                .filter(|s| Some(s.label.as_str()) != label),
        );
        ordered
    }
}

/// Whether a text blob is a vault payload.
pub fn is_vault_data(text: &str) -> bool {
    text.trim_start().starts_with(VAULT_HEADER)
}

/// Decrypt a whole vault-encrypted file body to UTF-8 text.
pub fn decrypt_file(text: &str, secrets: &VaultSecrets) -> Result<String> {
    let plaintext = decrypt(text, secrets)?;
    String::from_utf8(plaintext)
        .map_err(|_| Error::vault("decrypted vault data is not valid UTF-8"))
}

/// Walk a YAML document and decrypt every `!vault` tagged scalar in place.
pub fn decrypt_value(value: &mut Value, secrets: &VaultSecrets) -> Result<()> {
    match value {
        Value::Tagged(tagged) if tagged.tag.to_string() == "!vault" => {
            let body = tagged.value.as_str().ok_or_else(|| {
                Error::vault("!vault tagged value must be a string payload")
            })?;
            let plaintext = decrypt_file(body, secrets)?;
            *value = Value::String(plaintext);
        }
        Value::Mapping(mapping) => {
            for (_, v) in mapping.iter_mut() {
                decrypt_value(v, secrets)?;
            }
        }
        Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                decrypt_value(v, secrets)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Decrypt a vault payload to raw bytes.
pub fn decrypt(text: &str, secrets: &VaultSecrets) -> Result<Vec<u8>> {
    let envelope = Envelope::parse(text)?;

    if secrets.is_empty() {
        return Err(Error::vault(
            "vault-encrypted data found but no --vault-id was provided",
        ));
    }

    for secret in secrets.candidates(envelope.label.as_deref()) {
        if let Some(plaintext) = envelope.try_decrypt(&secret.password)? {
            return Ok(plaintext);
        }
    }

    Err(Error::vault(
        "no vault secret could decrypt the data (HMAC verification failed)",
    ))
}

/// Encrypt plaintext into a vault payload readable by [`decrypt`].
///
/// With a label the 1.2 header format is emitted, otherwise 1.1.
pub fn encrypt(plaintext: &[u8], password: &str, label: Option<&str>) -> Result<String> {
    let mut salt = [0u8; 32];
    getrandom::getrandom(&mut salt)
        .map_err(|e| Error::vault(format!("cannot gather salt entropy: {e}")))?;
    encrypt_with_salt(plaintext, password, label, &salt)
}

fn encrypt_with_salt(
    plaintext: &[u8],
    password: &str,
    label: Option<&str>,
    salt: &[u8; 32],
) -> Result<String> {
    let keys = DerivedKeys::derive(password, salt);

    // PKCS#7 pad to the AES block size.
    let pad = AES_BLOCK - plaintext.len() % AES_BLOCK;
    let mut buf = plaintext.to_vec();
    buf.extend(std::iter::repeat(pad as u8).take(pad));

    let mut cipher = Aes256Ctr::new_from_slices(&keys.aes_key, &keys.iv)
        .map_err(|e| Error::vault(format!("cipher init failed: {e}")))?;
    cipher.apply_keystream(&mut buf);

    let mut mac = HmacSha256::new_from_slice(&keys.hmac_key)
        .map_err(|e| Error::vault(format!("hmac init failed: {e}")))?;
    mac.update(&buf);
    let digest = mac.finalize().into_bytes();

    let inner = format!(
        "{}\n{}\n{}",
        hex::encode(salt),
        hex::encode(digest),
        hex::encode(&buf)
    );
    let body = hex::encode(inner.as_bytes());

    let header = match label {
        Some(label) => format!("{VAULT_HEADER};1.2;{CIPHER};{label}"),
        None => format!("{VAULT_HEADER};1.1;{CIPHER}"),
    };

    let mut out = header;
    for chunk in body.as_bytes().chunks(80) {
        out.push('\n');
        // hex output is pure ASCII
        out.push_str(std::str::from_utf8(chunk).map_err(|_| Error::vault("invalid hex"))?);
    }
    out.push('\n');
    Ok(out)
}

struct DerivedKeys {
    aes_key: [u8; 32],
    hmac_key: [u8; 32],
    iv: [u8; 16],
}

impl DerivedKeys {
    fn derive(password: &str, salt: &[u8]) -> Self {
        let mut material = [0u8; 80];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, KDF_ROUNDS, &mut material);

        let mut keys = DerivedKeys {
            aes_key: [0u8; 32],
            hmac_key: [0u8; 32],
            iv: [0u8; 16],
        };
        keys.aes_key.copy_from_slice(&material[..32]);
        keys.hmac_key.copy_from_slice(&material[32..64]);
        keys.iv.copy_from_slice(&material[64..]);
        keys
    }
}

struct Envelope {
    label: Option<String>,
    salt: Vec<u8>,
    hmac: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Envelope {
    fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (header, body) = text
            .split_once('\n')
            .ok_or_else(|| Error::vault("vault payload has no body"))?;

        let fields: Vec<&str> = header.trim().split(';').collect();
        match fields.as_slice() {
            [VAULT_HEADER, "1.1", CIPHER] => Self::parse_body(body, None),
            [VAULT_HEADER, "1.2", CIPHER, label] => {
                Self::parse_body(body, Some((*label).to_string()))
            }
            [VAULT_HEADER, version, cipher, ..] => Err(Error::vault(format!(
                "unsupported vault format {version};{cipher}"
            ))),
            _ => Err(Error::vault("malformed vault header")),
        }
    }

    fn parse_body(body: &str, label: Option<String>) -> Result<Self> {
        let joined: String = body.split_whitespace().collect();
        let decoded = hex::decode(joined.as_bytes())
            .map_err(|e| Error::vault(format!("invalid vault body hex: {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::vault("vault body is not hex-encoded text"))?;

        let mut parts = decoded.splitn(3, '\n');
        let salt_hex = parts.next().unwrap_or_default();
        let hmac_hex = parts
            .next()
            .ok_or_else(|| Error::vault("vault body is missing the HMAC field"))?;
        let ct_hex = parts
            .next()
            .ok_or_else(|| Error::vault("vault body is missing the ciphertext field"))?;

        Ok(Self {
            label,
            salt: hex::decode(salt_hex)
                .map_err(|e| Error::vault(format!("invalid vault salt: {e}")))?,
            hmac: hex::decode(hmac_hex)
                .map_err(|e| Error::vault(format!("invalid vault HMAC: {e}")))?,
            ciphertext: hex::decode(ct_hex)
                .map_err(|e| Error::vault(format!("invalid vault ciphertext: {e}")))?,
        })
    }

    /// Attempt decryption with one password. `Ok(None)` means the HMAC did
    /// not verify, i.e. wrong password.
    fn try_decrypt(&self, password: &str) -> Result<Option<Vec<u8>>> {
        let keys = DerivedKeys::derive(password, &self.salt);

        let mut mac = HmacSha256::new_from_slice(&keys.hmac_key)
            .map_err(|e| Error::vault(format!("hmac init failed: {e}")))?;
        mac.update(&self.ciphertext);
        if mac.verify_slice(&self.hmac).is_err() {
            return Ok(None);
        }

        let mut buf = self.ciphertext.clone();
        let mut cipher = Aes256Ctr::new_from_slices(&keys.aes_key, &keys.iv)
            .map_err(|e| Error::vault(format!("cipher init failed: {e}")))?;
        cipher.apply_keystream(&mut buf);

        unpad(buf).map(Some)
    }
}

fn unpad(mut buf: Vec<u8>) -> Result<Vec<u8>> {
    let pad = *buf
        .last()
        .ok_or_else(|| Error::vault("decrypted payload is empty"))? as usize;
    if pad == 0 || pad > AES_BLOCK || pad > buf.len() {
        return Err(Error::vault("invalid padding in decrypted payload"));
    }
    if !buf[buf.len() - pad..].iter().all(|&b| b == pad as u8) {
        return Err(Error::vault("invalid padding in decrypted payload"));
    }
    buf.truncate(buf.len() - pad);
    Ok(buf)
}

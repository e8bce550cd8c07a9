//! The `vault.cryptomator` configuration document: a compact HS256 JWT
//! binding format version, vault identity, and cipher selection.
//!
//! The signing key is the 64-byte concatenation of the AES encryption key
//! followed by the MAC key. The key order matters: a config signed with the
//! SIV ordering (MAC ∥ AES) will not verify for a compliant reader.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use url::Url;

use crate::{
    crypto::CryptoError,
    crypto::keys::{JwtValidationError, KeyAccessError, MasterKey},
    vault::{
        VAULT_FORMAT,
        master_key::{MASTERKEY_FILENAME, MasterKeyFile},
        persist_atomically,
    },
};

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};

/// Filename of the signed configuration document inside a vault.
pub const VAULT_CONFIG_FILENAME: &str = "vault.cryptomator";

/// Default shortening threshold: encrypted filenames longer than this many
/// characters are stored out-of-line by readers (mechanism out of scope
/// here; the value is part of the persisted configuration).
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

/// Cipher combination announced by a vault configuration.
///
/// New vaults always use `SIV_GCM` (AES-SIV for directory identifiers,
/// AES-GCM for content); anything else is rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherCombo {
    /// AES-SIV for names/identifiers, AES-GCM for content
    SivGcm,
}

/// Error returned when parsing an invalid cipher combo string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCipherComboError(String);

impl fmt::Display for ParseCipherComboError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown cipher combo: {}", self.0)
    }
}

impl std::error::Error for ParseCipherComboError {}

impl FromStr for CipherCombo {
    type Err = ParseCipherComboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIV_GCM" => Ok(CipherCombo::SivGcm),
            _ => Err(ParseCipherComboError(s.to_owned())),
        }
    }
}

impl CipherCombo {
    /// Convert to the configuration string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherCombo::SivGcm => "SIV_GCM",
        }
    }
}

/// Claims contained in the vault configuration JWT.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfigurationClaims {
    format: i32,
    #[serde(default = "default_shortening_threshold")]
    shortening_threshold: i32,
    jti: String,
    cipher_combo: String,
}

fn default_shortening_threshold() -> i32 {
    i32::try_from(DEFAULT_SHORTENING_THRESHOLD)
        .expect("DEFAULT_SHORTENING_THRESHOLD (220) fits in i32")
}

impl VaultConfigurationClaims {
    /// Returns the vault format version.
    pub fn format(&self) -> i32 {
        self.format
    }

    /// Returns the random vault identifier.
    pub fn jti(&self) -> &str {
        &self.jti
    }

    /// Returns the cipher combination string used by this vault.
    pub fn cipher_combo_str(&self) -> &str {
        &self.cipher_combo
    }

    /// Returns the parsed cipher combination, if supported.
    pub fn cipher_combo(&self) -> Option<CipherCombo> {
        self.cipher_combo.parse().ok()
    }

    /// Returns the shortening threshold for encrypted filenames.
    pub fn shortening_threshold(&self) -> usize {
        usize::try_from(self.shortening_threshold.max(0))
            .expect("shortening_threshold is ensured to be non-negative")
    }
}

/// Vault configuration for creating new vaults.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Random vault identifier (UUID-shaped, hyphenated hex)
    pub jti: String,
    /// Vault format version
    pub format: i32,
    /// Shortening threshold for encrypted filenames
    pub shortening_threshold: i32,
    /// Cipher combination for the new vault
    pub cipher_combo: CipherCombo,
}

impl VaultConfig {
    /// Configuration for a new vault with the current defaults and a fresh
    /// random identifier.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Configuration for a new vault with an explicit identifier.
    pub fn with_id(jti: impl Into<String>) -> Self {
        VaultConfig {
            jti: jti.into(),
            format: VAULT_FORMAT as i32,
            shortening_threshold: default_shortening_threshold(),
            cipher_combo: CipherCombo::SivGcm,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug)]
pub enum MasterKeyExtractionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT header decode error: {0}")]
    JwtHeader(#[from] jsonwebtoken::errors::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Missing kid in header")]
    MissingKid,

    #[error("Invalid masterkey file scheme")]
    InvalidScheme,

    #[error("Master key file not found at path: {0}")]
    MasterKeyFileNotFound(PathBuf),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Error, Debug)]
pub enum ClaimValidationError {
    #[error("JWT decode error: {0}")]
    JwtDecode(#[from] jsonwebtoken::errors::Error),

    #[error("JWT validation error: {0}")]
    JwtValidation(#[from] JwtValidationError),

    #[error("Unsupported cipher combo: {0}")]
    UnsupportedCipherCombo(String),

    #[error("Unsupported vault format: {0}")]
    UnsupportedVaultFormat(i32),
}

/// Error type for vault config creation
#[derive(Error, Debug)]
pub enum VaultConfigCreationError {
    #[error("JWT encoding error: {0}")]
    JwtEncode(#[from] jsonwebtoken::errors::Error),

    #[error("Key access error: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract the master key from a vault using the passphrase.
///
/// Reads the vault configuration JWT, resolves the `kid` header to the
/// masterkey file it names, and unlocks it.
pub fn extract_master_key(
    vault_path: &Path,
    passphrase: &str,
) -> Result<MasterKey, MasterKeyExtractionError> {
    extract_master_key_with_pepper(vault_path, passphrase, &[])
}

/// Extract the master key from a vault created with a pepper.
pub fn extract_master_key_with_pepper(
    vault_path: &Path,
    passphrase: &str,
    pepper: &[u8],
) -> Result<MasterKey, MasterKeyExtractionError> {
    let vault_config_path = vault_path.join(VAULT_CONFIG_FILENAME);
    let vault_config = fs::read_to_string(&vault_config_path)?;
    let header = jsonwebtoken::decode_header(&vault_config)?;

    let kid = header.kid.ok_or(MasterKeyExtractionError::MissingKid)?;
    let masterkey_uri = Url::parse(&kid)?;

    if masterkey_uri.scheme() != "masterkeyfile" {
        return Err(MasterKeyExtractionError::InvalidScheme);
    }

    let master_key_path = vault_path.join(Path::new(masterkey_uri.path()));
    if !master_key_path.exists() {
        return Err(MasterKeyExtractionError::MasterKeyFileNotFound(
            master_key_path,
        ));
    }

    let master_key_data_json = fs::read_to_string(&master_key_path)?;
    let master_key_data: MasterKeyFile = serde_json::from_str(&master_key_data_json)?;

    Ok(master_key_data.unlock_with_pepper(passphrase, pepper)?)
}

/// Validate and decode the vault configuration JWT claims.
///
/// Verifies the signature under the combined master key (AES ∥ MAC) and
/// rejects unsupported cipher combos and formats.
pub fn validate_vault_claims(
    vault_config: &str,
    master_key: &MasterKey,
) -> Result<VaultConfigurationClaims, ClaimValidationError> {
    let header = jsonwebtoken::decode_header(vault_config)?;

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

    let claims = master_key.validate_jwt::<VaultConfigurationClaims>(vault_config, &validation)?;

    if claims.cipher_combo().is_none() {
        return Err(ClaimValidationError::UnsupportedCipherCombo(
            claims.cipher_combo.clone(),
        ));
    }

    if claims.format != VAULT_FORMAT as i32 {
        return Err(ClaimValidationError::UnsupportedVaultFormat(claims.format));
    }

    Ok(claims)
}

/// Create a vault configuration JWT.
///
/// The header's `kid` names the masterkey file as the key source; the
/// signature is HMAC-SHA256 under the 64-byte AES ∥ MAC key.
pub fn create_vault_config(
    config: &VaultConfig,
    master_key: &MasterKey,
) -> Result<String, VaultConfigCreationError> {
    let claims = VaultConfigurationClaims {
        format: config.format,
        shortening_threshold: config.shortening_threshold,
        jti: config.jti.clone(),
        cipher_combo: config.cipher_combo.as_str().to_string(),
    };

    let encoding_key = master_key.create_jwt_encoding_key()?;
    let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
    header.kid = Some(format!("masterkeyfile:{MASTERKEY_FILENAME}"));

    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

/// Create the configuration JWT and atomically persist it.
pub fn write_vault_config(
    path: &Path,
    config: &VaultConfig,
    master_key: &MasterKey,
) -> Result<(), VaultConfigCreationError> {
    let jwt = create_vault_config(config, master_key)?;
    persist_atomically(path, jwt.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_create_and_validate_config() {
        let master_key = MasterKey::random().unwrap();
        let config = VaultConfig::new();

        let jwt = create_vault_config(&config, &master_key).unwrap();
        let claims = validate_vault_claims(&jwt, &master_key).unwrap();

        assert_eq!(claims.format(), 8);
        assert_eq!(claims.shortening_threshold(), 220);
        assert_eq!(claims.cipher_combo(), Some(CipherCombo::SivGcm));
        assert_eq!(claims.jti(), config.jti);
    }

    #[test]
    fn test_kid_names_masterkey_file() {
        let master_key = MasterKey::random().unwrap();
        let jwt = create_vault_config(&VaultConfig::new(), &master_key).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(
            header.kid.as_deref(),
            Some("masterkeyfile:masterkey.cryptomator")
        );
        assert_eq!(header.alg, Algorithm::HS256);
    }

    #[test]
    fn test_signature_requires_enc_then_mac_key_order() {
        let master_key = MasterKey::new([1u8; 32], [2u8; 32]).unwrap();
        let jwt = create_vault_config(&VaultConfig::new(), &master_key).unwrap();

        // Correct order verifies
        assert!(validate_vault_claims(&jwt, &master_key).is_ok());

        // A key with the halves swapped (the SIV ordering) must not verify
        let swapped = MasterKey::new([2u8; 32], [1u8; 32]).unwrap();
        assert!(validate_vault_claims(&jwt, &swapped).is_err());
    }

    #[test]
    fn test_signature_rejects_bit_flipped_key() {
        let master_key = MasterKey::new([1u8; 32], [2u8; 32]).unwrap();
        let jwt = create_vault_config(&VaultConfig::new(), &master_key).unwrap();

        let mut flipped_aes = [1u8; 32];
        flipped_aes[0] ^= 0x01;
        let flipped = MasterKey::new(flipped_aes, [2u8; 32]).unwrap();
        assert!(validate_vault_claims(&jwt, &flipped).is_err());
    }

    #[test]
    fn test_tampered_claims_fail_validation() {
        use data_encoding::BASE64URL_NOPAD;

        let master_key = MasterKey::random().unwrap();
        let token = create_vault_config(&VaultConfig::new(), &master_key).unwrap();

        // Swap out the cipher combo in the payload without re-signing
        let tampered_token = {
            let mut parts = token.split('.').collect::<Vec<&str>>();
            let claims_json =
                String::from_utf8(BASE64URL_NOPAD.decode(parts[1].as_bytes()).unwrap()).unwrap();
            let tampered_claims_json = claims_json.replace("SIV_GCM", "SIV_CBC");
            let tampered_payload = BASE64URL_NOPAD.encode(tampered_claims_json.as_bytes());
            parts[1] = &tampered_payload;
            parts.join(".")
        };

        let result = validate_vault_claims(&tampered_token, &master_key);
        match result {
            Err(ClaimValidationError::JwtDecode(_) | ClaimValidationError::JwtValidation(_)) => (),
            Ok(_) => panic!("Tampered token was validated successfully"),
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }

    #[test]
    fn test_unsupported_cipher_combo_rejected() {
        assert!("SIV_CTRMAC".parse::<CipherCombo>().is_err());
        assert!("SIV_CBC".parse::<CipherCombo>().is_err());
        assert_eq!("SIV_GCM".parse::<CipherCombo>(), Ok(CipherCombo::SivGcm));
    }

    #[test]
    fn test_vault_id_is_uuid_shaped() {
        let config = VaultConfig::new();
        assert!(Uuid::parse_str(&config.jti).is_ok());
    }

    #[test]
    fn test_custom_shortening_threshold_preserved() {
        let master_key = MasterKey::random().unwrap();
        let mut config = VaultConfig::new();
        config.shortening_threshold = 100;

        let jwt = create_vault_config(&config, &master_key).unwrap();
        let claims = validate_vault_claims(&jwt, &master_key).unwrap();
        assert_eq!(claims.shortening_threshold(), 100);
    }
}

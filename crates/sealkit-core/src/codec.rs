//! Config codec: whole config maps encrypted field by field.
//!
//! Keys (field names) stay in plaintext; every value is an independent
//! [`encrypt_with_dek`] ciphertext. A map is only ever decrypted as a whole:
//! one bad field fails the call, naming the field but never its value.

use sealkit_storage::ConfigMap;

use crate::cipher::{Dek, decrypt_with_dek, encrypt_with_dek};
use crate::error::CipherError;

/// Encrypt every value of `config` with `dek`, preserving keys.
///
/// # Errors
///
/// Returns [`CipherError::Field`] wrapping the first encryption failure.
pub fn encrypt_config(config: &ConfigMap, dek: &Dek) -> Result<ConfigMap, CipherError> {
    config
        .iter()
        .map(|(field, value)| {
            encrypt_with_dek(value, dek)
                .map(|encrypted| (field.clone(), encrypted))
                .map_err(|e| field_error(field, e))
        })
        .collect()
}

/// Decrypt every value of `encrypted` with `dek`.
///
/// # Errors
///
/// Returns [`CipherError::Field`] wrapping the first failing field's
/// [`CipherError::MalformedCiphertext`] or [`CipherError::DecryptionFailed`].
pub fn decrypt_config(encrypted: &ConfigMap, dek: &Dek) -> Result<ConfigMap, CipherError> {
    encrypted
        .iter()
        .map(|(field, value)| {
            decrypt_with_dek(value, dek)
                .map(|plaintext| (field.clone(), plaintext))
                .map_err(|e| field_error(field, e))
        })
        .collect()
}

/// Move a config map from `old_dek` to `new_dek`.
///
/// The full re-encrypted map is built in memory before it is returned, so a
/// caller writing the result never writes a half-rotated map.
///
/// # Errors
///
/// Any error of [`decrypt_config`] (against `old_dek`) or [`encrypt_config`].
pub fn re_encrypt_config(
    encrypted: &ConfigMap,
    old_dek: &Dek,
    new_dek: &Dek,
) -> Result<ConfigMap, CipherError> {
    let plaintext = decrypt_config(encrypted, old_dek)?;
    encrypt_config(&plaintext, new_dek)
}

fn field_error(field: &str, source: CipherError) -> CipherError {
    CipherError::Field {
        field: field.to_owned(),
        source: Box::new(source),
    }
}

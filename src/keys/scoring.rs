//! Scores a key's fitness for encryption, verification and signing, and picks
//! the best key of a ring when none is pinned.
//!
//! Selection prefers keys whose self-signatures declare the right capability
//! flags, but relaxes the required score step by step so that keys with
//! missing or odd flags (common with older keys) are still usable.

use crate::errors::{Error, Result};
use crate::keys::KeyCapabilities;

/// Accepted minimum scores for encryption keys, strictest first.
pub const ENCRYPTION_THRESHOLDS: [u8; 3] = [4, 3, 2];

/// Accepted minimum scores for verification keys, strictest first.
pub const VERIFICATION_THRESHOLDS: [u8; 2] = [3, 1];

/// Fitness for encryption, between 0 and 5.
pub fn encryption_score<K: KeyCapabilities + ?Sized>(key: &K) -> u8 {
    let caps = key.capabilities();
    let mut score = 0;
    if key.is_master_key() {
        score += 1;
    }
    if key.is_encryption_key() {
        score += 2;
    }
    if caps.encrypt_comms {
        score += 1;
    }
    if caps.encrypt_storage {
        score += 1;
    }
    score
}

/// Fitness for verifying signatures, between 0 and 3.
pub fn verification_score<K: KeyCapabilities + ?Sized>(key: &K) -> u8 {
    let mut score = 0;
    if key.is_master_key() {
        score += 1;
    }
    if key.capabilities().sign {
        score += 2;
    }
    score
}

/// Fitness of a secret key for signing, between 0 and 5.
pub fn secret_signing_score<K: KeyCapabilities + ?Sized>(key: &K) -> u8 {
    let mut score = 0;
    if key.is_signing_key() {
        score += 2;
    }
    score + verification_score(key)
}

/// Index of the best encryption key, see [`ENCRYPTION_THRESHOLDS`].
pub fn encryption_key_index<K: KeyCapabilities>(keys: &[K]) -> Option<usize> {
    select_index(keys, encryption_score, &ENCRYPTION_THRESHOLDS)
}

/// Index of the best verification key, see [`VERIFICATION_THRESHOLDS`].
pub fn verification_key_index<K: KeyCapabilities>(keys: &[K]) -> Option<usize> {
    select_index(keys, verification_score, &VERIFICATION_THRESHOLDS)
}

/// Index of the best signing key. Every key is a candidate.
pub fn signing_key_index<K: KeyCapabilities>(keys: &[K]) -> Option<usize> {
    best(keys.iter().enumerate(), secret_signing_score)
}

pub fn select_encryption_key<K: KeyCapabilities + Copy>(keys: &[K]) -> Option<K> {
    encryption_key_index(keys).map(|i| keys[i])
}

pub fn select_verification_key<K: KeyCapabilities + Copy>(keys: &[K]) -> Option<K> {
    verification_key_index(keys).map(|i| keys[i])
}

pub fn select_signing_key<K: KeyCapabilities + Copy>(keys: &[K]) -> Option<K> {
    signing_key_index(keys).map(|i| keys[i])
}

/// The single master key among `keys`.
pub fn master_key<K: KeyCapabilities + Copy>(keys: &[K]) -> Result<K> {
    let mut masters = keys.iter().filter(|k| k.is_master_key());
    match (masters.next(), masters.count()) {
        (None, _) => Err(Error::NoMasterKey),
        (Some(key), 0) => Ok(*key),
        (Some(_), rest) => Err(Error::AmbiguousMasterKey { count: rest + 1 }),
    }
}

/// Tries each threshold in turn; the first non empty candidate set wins.
fn select_index<K>(keys: &[K], score: fn(&K) -> u8, thresholds: &[u8]) -> Option<usize> {
    thresholds.iter().find_map(|&min| {
        best(
            keys.iter().enumerate().filter(|(_, k)| score(k) >= min),
            score,
        )
    })
}

/// Highest score, first encountered on ties.
fn best<'a, K: 'a>(
    candidates: impl Iterator<Item = (usize, &'a K)>,
    score: fn(&K) -> u8,
) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (i, key) in candidates {
        let s = score(key);
        if best.map_or(true, |(_, top)| s > top) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}

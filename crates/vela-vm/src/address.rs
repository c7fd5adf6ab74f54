//! Base58check account addresses.
//!
//! An address encodes `[version, hash...20, checksum...4]` where the
//! checksum is the first four bytes of the double SHA-256 of the first 21
//! bytes. The compiler resolves address literals at compile time.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Address version byte.
pub const VERSION: u8 = 0x35;

const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58 character {0:?}")]
    InvalidChar(char),
    #[error("invalid address length")]
    InvalidLength,
    #[error("address checksum mismatch")]
    Checksum,
    #[error("unexpected address version 0x{0:02x}")]
    Version(u8),
}

/// Decode an address string into its 20-byte account hash.
pub fn decode(s: &str) -> Result<[u8; 20], AddressError> {
    let raw = base58_decode(s)?;
    if raw.len() != 25 {
        return Err(AddressError::InvalidLength);
    }
    let checksum = hash256(&raw[..21]);
    if checksum[..4] != raw[21..] {
        return Err(AddressError::Checksum);
    }
    if raw[0] != VERSION {
        return Err(AddressError::Version(raw[0]));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&raw[1..21]);
    Ok(hash)
}

/// Encode a 20-byte account hash as an address string.
pub fn encode(hash: &[u8; 20]) -> String {
    let mut raw = Vec::with_capacity(25);
    raw.push(VERSION);
    raw.extend_from_slice(hash);
    let checksum = hash256(&raw);
    raw.extend_from_slice(&checksum[..4]);
    base58_encode(&raw)
}

fn hash256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

fn base58_decode(s: &str) -> Result<Vec<u8>, AddressError> {
    let mut out: Vec<u8> = Vec::new();
    for ch in s.chars() {
        let digit = ALPHABET
            .iter()
            .position(|&a| a as char == ch)
            .ok_or(AddressError::InvalidChar(ch))? as u32;
        let mut carry = digit;
        for byte in out.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xFF) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            out.push((carry & 0xFF) as u8);
            carry >>= 8;
        }
    }
    // leading '1's are leading zero bytes
    for ch in s.chars() {
        if ch != '1' {
            break;
        }
        out.push(0);
    }
    out.reverse();
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    let mut digits: Vec<u8> = Vec::new();
    for &byte in data {
        let mut carry = byte as u32;
        for d in digits.iter_mut() {
            carry += (*d as u32) << 8;
            *d = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    let mut out = String::new();
    for &byte in data {
        if byte != 0 {
            break;
        }
        out.push('1');
    }
    for &d in digits.iter().rev() {
        out.push(ALPHABET[d as usize] as char);
    }
    out
}

// src/core/crypto/codes.rs
//! Identifier and pairing-code generation: activation codes, recovery
//! codes, activation IDs, token IDs and recovery PUKs.

use base64::{engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}, Engine as _};
use rand::{rngs::OsRng, Rng};
use uuid::Uuid;

use super::cipher::random_bytes;

/// RFC 4648 base32 alphabet, used by activation and recovery codes.
const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

pub const ACTIVATION_CODE_LENGTH: usize = 23;

/// Random 20-character base32 code in four dash-separated groups of five.
/// The underlying value is 10 random bytes followed by their CRC-16 (ARC),
/// so any single-character mutation is caught by the validator.
pub fn generate_code() -> String {
    let random = random_bytes(10);
    let mut payload = random;
    payload.extend_from_slice(&crc16_arc(&payload[..10]).to_be_bytes());

    let encoded = base32_encode(&payload);
    format!(
        "{}-{}-{}-{}",
        &encoded[0..5],
        &encoded[5..10],
        &encoded[10..15],
        &encoded[15..20]
    )
}

/// Validates the 23-character dash-separated form including the CRC-16
/// checksum carried in the final characters.
pub fn validate_code(code: &str) -> bool {
    if code.len() != ACTIVATION_CODE_LENGTH {
        return false;
    }
    let groups: Vec<&str> = code.split('-').collect();
    if groups.len() != 4 || groups.iter().any(|g| g.len() != 5) {
        return false;
    }

    let payload = match base32_decode(&groups.concat()) {
        Some(bytes) => bytes,
        None => return false,
    };
    if payload.len() != 12 {
        return false;
    }

    let expected = crc16_arc(&payload[..10]);
    let carried = u16::from_be_bytes([payload[10], payload[11]]);
    expected == carried
}

/// Opaque activation identifier (UUIDv4 text form).
pub fn generate_activation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Token identifier: 16 random bytes, base64-url without padding.
pub fn generate_token_id() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(16))
}

/// Application key / secret: 16 random bytes, standard base64.
pub fn generate_application_credential() -> String {
    STANDARD.encode(random_bytes(16))
}

/// 4-digit numeric PUK, zero-padded.
pub fn generate_puk() -> String {
    format!("{:04}", OsRng.gen_range(0..10_000))
}

/// CRC-16/ARC: polynomial 0x8005 reflected, zero initial value.
fn crc16_arc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn base32_encode(data: &[u8]) -> String {
    let mut output = String::new();
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            output.push(CODE_ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        output.push(CODE_ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    output
}

fn base32_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut output = Vec::new();
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for c in encoded.bytes() {
        let value = CODE_ALPHABET.iter().position(|&a| a == c)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            output.push((buffer >> bits) as u8);
        }
    }
    // Trailing padding bits must be zero.
    if bits > 0 && (buffer & ((1 << bits) - 1)) != 0 {
        return None;
    }
    Some(output)
}

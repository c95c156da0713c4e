//! Base58 (Bitcoin alphabet) for capability links
//!
//! Leading zero bytes are encoded as leading `'1'` characters, so every
//! byte string round-trips exactly, including all-zero keys.

use ctfs_core::{CtfsError, CtfsResult};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const INVALID: u8 = 0xff;

const fn decode_table() -> [u8; 128] {
    let mut table = [INVALID; 128];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

const DECODE: [u8; 128] = decode_table();

pub fn encode(input: &[u8]) -> String {
    let zeros = input.iter().take_while(|&&b| b == 0).count();

    // Base-58 digits, least significant first.
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);
    for &byte in &input[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|&d| ALPHABET[d as usize] as char));
    out
}

pub fn decode(input: &str) -> CtfsResult<Vec<u8>> {
    let raw = input.as_bytes();
    let zeros = raw.iter().take_while(|&&c| c == b'1').count();

    // Base-256 bytes, least significant first.
    let mut bytes: Vec<u8> = Vec::with_capacity(raw.len());
    for &c in &raw[zeros..] {
        let value = if c < 128 { DECODE[c as usize] } else { INVALID };
        if value == INVALID {
            return Err(CtfsError::structural(format!(
                "invalid base58 character {:?}",
                c as char
            )));
        }
        let mut carry = value as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}

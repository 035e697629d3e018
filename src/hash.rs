//! Content addressing for lowered kernels.
//!
//! A kernel's identity is the BLAKE3 hash of its printed body. The kernel
//! name is not part of the body, so renaming a kernel keeps its hash, while
//! any change to an instruction, a type or a meta-parameter that reaches
//! the IR produces a new one.

use std::fmt;

use crate::ir::Kernel;

// Version byte for hash stability
const HASH_VERSION: u8 = 1;

/// A 256-bit BLAKE3 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Display as full hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Display as short base-32 (8 characters, 40 bits).
    pub fn to_short(&self) -> String {
        const ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstuvwxyz";
        let val = u64::from_be_bytes([
            0, 0, 0, self.0[0], self.0[1], self.0[2], self.0[3], self.0[4],
        ]);
        (0..8)
            .rev()
            .map(|i| ALPHABET[((val >> (i * 5)) & 0x1F) as usize] as char)
            .collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

/// Hash of a lowered kernel.
pub fn hash_kernel(kernel: &Kernel) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[HASH_VERSION]);
    hasher.update(kernel.body_text().as_bytes());
    ContentHash(*hasher.finalize().as_bytes())
}

// Injected randomness source.
//
// Consensus only needs a deterministic derivation every node agrees on:
// derive(seed, context) must be a pure function of its inputs. The
// default implementation is a domain-separated blake3; a real VRF with
// proofs of correct evaluation can be swapped in without touching the
// callers.

use gradia_common::crypto::{hash, Hash};

pub trait VrfSource: Send + Sync {
    /// Deterministically derive a 32-byte value from a seed and a
    /// context string
    fn derive(&self, seed: &Hash, context: &[u8]) -> Hash;
}

/// Domain-separated blake3 derivation
#[derive(Debug, Default, Clone)]
pub struct Blake3Vrf;

impl VrfSource for Blake3Vrf {
    fn derive(&self, seed: &Hash, context: &[u8]) -> Hash {
        let mut bytes = Vec::with_capacity(4 + 32 + context.len());
        bytes.extend(b"vrf:");
        bytes.extend(seed.as_bytes());
        bytes.extend(context);
        hash(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let vrf = Blake3Vrf;
        let seed = hash(b"seed");
        assert_eq!(vrf.derive(&seed, b"ctx"), vrf.derive(&seed, b"ctx"));
        assert_ne!(vrf.derive(&seed, b"ctx"), vrf.derive(&seed, b"other"));
        assert_ne!(vrf.derive(&seed, b"ctx"), vrf.derive(&hash(b"seed2"), b"ctx"));
    }
}

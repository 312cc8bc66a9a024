pub mod argon2;
pub mod common;
pub mod hash;
pub mod memory;
pub mod program;
pub mod softfloat;
pub mod superscalar;
pub mod vm;

use std::sync::Arc;

use self::memory::VmMemory;
use self::vm::Vm;

/// Trait defining the interface for a RandomX virtual machine
pub trait RandomXVM {
    /// Calculates a RandomX hash for the given input bytes
    fn calculate_hash(&mut self, input: &[u8]) -> blake2b_simd::Hash;
}

// Implement the RandomXVM trait for the Vm struct
impl RandomXVM for Vm {
    fn calculate_hash(&mut self, input: &[u8]) -> blake2b_simd::Hash {
        self.calculate_hash(input)
    }
}

/// Builds the cache for `key`: the Argon2d memory plus the eight
/// SuperscalarHash programs. Expensive; share the result across hashes.
pub fn cache_init(key: &[u8]) -> Arc<VmMemory> {
    Arc::new(VmMemory::light(key))
}

/// Computes the 32-byte RandomX digest of `input` against an initialized
/// cache.
pub fn hash(mem: &Arc<VmMemory>, input: &[u8]) -> [u8; 32] {
    let mut vm = Vm::new(mem.clone());
    let digest = vm.calculate_hash(input);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}

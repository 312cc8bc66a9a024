#![crate_name = "ferrox"]
#![crate_type = "lib"]

//! Pure-Rust RandomX proof-of-work hasher, light mode, interpreted.
//!
//! The cache (256 MiB Argon2d memory plus eight SuperscalarHash programs) is
//! derived from a key and shared read-only across VMs; each hash runs eight
//! chained programs of a pseudo-random virtual machine over a private 2 MiB
//! scratchpad and folds the result into a 32-byte BLAKE2b digest.
//!
//! ```no_run
//! let cache = ferrox::cache_init(b"RandomX example key\x00");
//! let digest = ferrox::hash(&cache, b"RandomX example input\x00");
//! println!("{}", ferrox::byte_string::u8_array_to_string(&digest));
//! ```

extern crate blake2b_simd;
extern crate hex;

#[macro_use]
extern crate log;

pub mod byte_string;
pub mod randomx;

pub use randomx::{cache_init, hash, RandomXVM};

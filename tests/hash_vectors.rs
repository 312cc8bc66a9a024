//! Official RandomX test vectors.
//!
//! Vectors are grouped per key so the 256 MiB cache is built once per group.
//! https://github.com/tevador/RandomX/blob/master/src/tests/tests.cpp

use std::sync::Arc;

use ferrox::randomx::memory::VmMemory;
use ferrox::randomx::vm::Vm;

#[test]
fn official_test_vectors() {
    let groups: Vec<(&[u8], Vec<(&[u8], &str)>)> = vec![
        (
            b"RandomX example key\x00",
            vec![(
                b"RandomX example input\x00".as_slice(),
                "8a48e5f9db45ab79d9080574c4d81954fe6ac63842214aff73c244b26330b7c9",
            )],
        ),
        (
            b"test key 000",
            vec![
                (
                    b"This is a test".as_slice(),
                    "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f",
                ),
                (
                    b"Lorem ipsum dolor sit amet".as_slice(),
                    "300a0adb47603dedb42228ccb2b211104f4da45af709cd7547cd049e9489c969",
                ),
                (
                    b"sed do eiusmod tempor incididunt ut labore et dolore magna aliqua"
                        .as_slice(),
                    "c36d4ed4191e617309867ed66a443be4075014e2b061bcdaf9ce7b721d2b77a8",
                ),
            ],
        ),
        (
            b"test key 001",
            vec![(
                b"sed do eiusmod tempor incididunt ut labore et dolore magna aliqua".as_slice(),
                "e9ff4503201c0c2cca26d285c93ae883f9b1d30c9eb240b820756f2d5a7905fc",
            )],
        ),
    ];

    for (key, vectors) in groups {
        let mem = Arc::new(VmMemory::light(key));
        let mut vm = Vm::new(mem.clone());
        for (input, expected) in vectors {
            let digest = vm.calculate_hash(input);
            assert_eq!(
                hex::encode(digest.as_bytes()),
                expected,
                "key {:?} input {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(input),
            );
        }
    }
}

#[test]
fn hashing_is_deterministic_and_reusable() {
    let mem = ferrox::cache_init(b"test key 000");
    let first = ferrox::hash(&mem, b"This is a test");
    let second = ferrox::hash(&mem, b"This is a test");
    assert_eq!(first, second);
    assert_eq!(
        hex::encode(first),
        "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f"
    );

    // The same VM instance reproduces the digest too: the scratchpad is
    // reinitialized per hash and the rounding mode does not leak.
    let mut vm = Vm::new(mem.clone());
    let a = vm.calculate_hash(b"Lorem ipsum dolor sit amet");
    let b = vm.calculate_hash(b"Lorem ipsum dolor sit amet");
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn caches_from_same_key_are_identical() {
    let a = VmMemory::light(b"test key 001");
    let b = VmMemory::light(b"test key 001");
    assert_eq!(a.seed_memory.blocks.len(), b.seed_memory.blocks.len());
    assert_eq!(a.seed_memory.blocks[0], b.seed_memory.blocks[0]);
    assert_eq!(
        a.seed_memory.blocks[a.seed_memory.blocks.len() - 1],
        b.seed_memory.blocks[b.seed_memory.blocks.len() - 1]
    );
    for (pa, pb) in a.seed_memory.programs.iter().zip(b.seed_memory.programs.iter()) {
        assert_eq!(pa.instructions, pb.instructions);
        assert_eq!(pa.address_reg, pb.address_reg);
    }
}

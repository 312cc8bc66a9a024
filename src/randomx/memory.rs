use std::sync::Arc;
use std::time::Instant;

use super::super::byte_string;
use super::argon2::{self, Block};
use super::common::{
    ARGON_BLOCK_SIZE, CACHE_LINE_SIZE, CACHE_SIZE, RANDOMX_ARGON_ITERATIONS,
    RANDOMX_ARGON_LANES, RANDOMX_ARGON_MEMORY, RANDOMX_ARGON_SALT, RANDOMX_CACHE_ACCESSES,
};
use super::superscalar::{Blake2Generator, ScProgram};

pub const DATASET_ITEM_COUNT: usize = ((2147483648u64 + 33554368) / 64) as usize; //34.078.719

const SUPERSCALAR_MUL_0: u64 = 6364136223846793005;
const SUPERSCALAR_ADD_1: u64 = 9298411001130361340;
const SUPERSCALAR_ADD_2: u64 = 12065312585734608966;
const SUPERSCALAR_ADD_3: u64 = 9306329213124626780;
const SUPERSCALAR_ADD_4: u64 = 5281919268842080866;
const SUPERSCALAR_ADD_5: u64 = 10536153434571861004;
const SUPERSCALAR_ADD_6: u64 = 3398623926847679864;
const SUPERSCALAR_ADD_7: u64 = 9549104520008361294;

//256MiB, always used, named randomx_cache in the reference implementation
pub struct SeedMemory {
    pub blocks: Box<[Block]>,
    pub programs: Vec<ScProgram>,
}

impl SeedMemory {
    pub fn no_memory() -> SeedMemory {
        SeedMemory {
            blocks: Box::new([]),
            programs: Vec::with_capacity(0),
        }
    }

    /// Creates a new initialised seed memory.
    pub fn new_initialised(key: &[u8]) -> SeedMemory {
        let mut mem = argon2::Memory::new(RANDOMX_ARGON_LANES, RANDOMX_ARGON_MEMORY);
        let context = &create_argon_context(key);
        argon2::initialize(context, &mut mem);
        argon2::fill_memory_blocks(context, &mut mem);

        let mut programs = Vec::with_capacity(RANDOMX_CACHE_ACCESSES);
        let mut gen = Blake2Generator::new(key, 0);
        for _ in 0..RANDOMX_CACHE_ACCESSES {
            programs.push(ScProgram::generate(&mut gen));
        }

        SeedMemory {
            blocks: mem.blocks,
            programs,
        }
    }
}

fn create_argon_context(key: &[u8]) -> argon2::Context {
    let segment_length = RANDOMX_ARGON_MEMORY / (RANDOMX_ARGON_LANES * argon2::ARGON2_SYNC_POINTS);
    let config = argon2::Config {
        ad: &[],
        hash_length: 0,
        lanes: RANDOMX_ARGON_LANES,
        mem_cost: RANDOMX_ARGON_MEMORY,
        secret: &[],
        time_cost: RANDOMX_ARGON_ITERATIONS,
        variant: argon2::Variant::Argon2d,
        version: argon2::Version::Version13,
    };
    argon2::Context {
        config,
        memory_blocks: RANDOMX_ARGON_MEMORY,
        pwd: key,
        salt: RANDOMX_ARGON_SALT,
        lane_length: segment_length * argon2::ARGON2_SYNC_POINTS,
        segment_length,
    }
}

fn mix_block_value(seed_mem: &SeedMemory, reg_value: u64, r: usize) -> u64 {
    let mask = CACHE_SIZE / CACHE_LINE_SIZE - 1;
    let byte_offset = ((reg_value & mask) * CACHE_LINE_SIZE) + (8 * r as u64);

    let block_ix = byte_offset / ARGON_BLOCK_SIZE as u64;
    let block_v_ix = (byte_offset - (block_ix * ARGON_BLOCK_SIZE as u64)) / 8;
    seed_mem.blocks[block_ix as usize][block_v_ix as usize]
}

pub fn init_dataset_item(seed_mem: &SeedMemory, item_num: u64) -> [u64; 8] {
    let mut ds = [0; 8];

    let mut reg_value = item_num;
    ds[0] = (item_num + 1).wrapping_mul(SUPERSCALAR_MUL_0);
    ds[1] = ds[0] ^ SUPERSCALAR_ADD_1;
    ds[2] = ds[0] ^ SUPERSCALAR_ADD_2;
    ds[3] = ds[0] ^ SUPERSCALAR_ADD_3;
    ds[4] = ds[0] ^ SUPERSCALAR_ADD_4;
    ds[5] = ds[0] ^ SUPERSCALAR_ADD_5;
    ds[6] = ds[0] ^ SUPERSCALAR_ADD_6;
    ds[7] = ds[0] ^ SUPERSCALAR_ADD_7;

    for prog in &seed_mem.programs {
        prog.execute(&mut ds);

        for (r, v) in ds.iter_mut().enumerate() {
            let mix_value = mix_block_value(seed_mem, reg_value, r);
            *v ^= mix_value;
        }
        reg_value = ds[prog.address_reg];
    }
    ds
}

#[derive(Clone)]
pub struct VmMemoryAllocator {
    pub vm_memory_seed: String,
    pub vm_memory: Arc<VmMemory>,
}

impl VmMemoryAllocator {
    pub fn initial() -> VmMemoryAllocator {
        VmMemoryAllocator {
            vm_memory_seed: "".to_string(),
            vm_memory: Arc::new(VmMemory::no_memory()),
        }
    }

    pub fn reallocate(&mut self, seed: String) -> bool {
        if seed != self.vm_memory_seed {
            let mem_init_start = Instant::now();
            self.vm_memory = Arc::new(VmMemory::light(&byte_string::string_to_u8_array(&seed)));
            self.vm_memory_seed = seed;
            info!(
                "memory init took {}ms with seed_hash: {}",
                mem_init_start.elapsed().as_millis(),
                self.vm_memory_seed,
            );
            return true; // Memory was reallocated
        }
        false // No reallocation needed
    }

    pub fn get_memory(&self) -> Arc<VmMemory> {
        self.vm_memory.clone()
    }
}

pub struct VmMemory {
    pub seed_memory: SeedMemory,
}

impl VmMemory {
    //only useful for testing
    pub fn no_memory() -> VmMemory {
        VmMemory {
            seed_memory: SeedMemory::no_memory(),
        }
    }

    pub fn light(key: &[u8]) -> VmMemory {
        VmMemory {
            seed_memory: SeedMemory::new_initialised(key),
        }
    }

    /// Derives the 64-byte dataset item containing `offset` and XORs its
    /// eight words into `reg`. Light mode: every item is recomputed from the
    /// cache on demand.
    pub fn dataset_read(&self, offset: u64, reg: &mut [u64; 8]) {
        let item_num = offset / CACHE_LINE_SIZE;
        let rl = init_dataset_item(&self.seed_memory, item_num);

        for (v, m) in reg.iter_mut().zip(rl.iter()) {
            *v ^= m;
        }
    }
}

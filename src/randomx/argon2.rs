//! Argon2d memory fill (version 0x13).
//!
//! The cache needs the raw filled block array, hashed with a tag length of
//! zero — the password-hashing crates on crates.io neither expose their
//! memory nor accept a zero-length tag, so the fill lives here. Only the
//! parts RandomX exercises are implemented: Argon2d, single-threaded, no
//! output tag.

use blake2b_simd::Params;

pub type Block = [u64; 128];

pub const ARGON2_SYNC_POINTS: u32 = 4;
const ZERO_BLOCK: Block = [0u64; 128];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Variant {
    Argon2d,
}

impl Variant {
    fn as_u32(self) -> u32 {
        match self {
            Variant::Argon2d => 0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Version {
    Version13,
}

impl Version {
    fn as_u32(self) -> u32 {
        match self {
            Version::Version13 => 0x13,
        }
    }
}

pub struct Config<'a> {
    pub ad: &'a [u8],
    pub hash_length: u32,
    pub lanes: u32,
    pub mem_cost: u32,
    pub secret: &'a [u8],
    pub time_cost: u32,
    pub variant: Variant,
    pub version: Version,
}

pub struct Context<'a> {
    pub config: Config<'a>,
    pub memory_blocks: u32,
    pub pwd: &'a [u8],
    pub salt: &'a [u8],
    pub lane_length: u32,
    pub segment_length: u32,
}

pub struct Memory {
    pub blocks: Box<[Block]>,
}

impl Memory {
    pub fn new(_lanes: u32, mem_cost: u32) -> Memory {
        Memory {
            blocks: vec![ZERO_BLOCK; mem_cost as usize].into_boxed_slice(),
        }
    }
}

/// H0 plus the first two blocks of every lane.
pub fn initialize(context: &Context, memory: &mut Memory) {
    let h0 = initial_hash(context);
    for lane in 0..context.config.lanes {
        for block in 0..2u32 {
            let mut input = Vec::with_capacity(h0.len() + 8);
            input.extend_from_slice(&h0);
            input.extend_from_slice(&block.to_le_bytes());
            input.extend_from_slice(&lane.to_le_bytes());
            let bytes = hash_long(&input, 1024);
            let dst = &mut memory.blocks[(lane * context.lane_length + block) as usize];
            for (i, word) in dst.iter_mut().enumerate() {
                *word = u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
            }
        }
    }
}

fn initial_hash(context: &Context) -> [u8; 64] {
    let cfg = &context.config;
    let mut state = Params::new().hash_length(64).to_state();
    state.update(&cfg.lanes.to_le_bytes());
    state.update(&cfg.hash_length.to_le_bytes());
    state.update(&cfg.mem_cost.to_le_bytes());
    state.update(&cfg.time_cost.to_le_bytes());
    state.update(&cfg.version.as_u32().to_le_bytes());
    state.update(&cfg.variant.as_u32().to_le_bytes());
    state.update(&(context.pwd.len() as u32).to_le_bytes());
    state.update(context.pwd);
    state.update(&(context.salt.len() as u32).to_le_bytes());
    state.update(context.salt);
    state.update(&(cfg.secret.len() as u32).to_le_bytes());
    state.update(cfg.secret);
    state.update(&(cfg.ad.len() as u32).to_le_bytes());
    state.update(cfg.ad);
    let mut h0 = [0u8; 64];
    h0.copy_from_slice(state.finalize().as_bytes());
    h0
}

/// Variable-length hash H': chained 64-byte BLAKE2b outputs, 32 bytes kept
/// from each link, the final link emitted whole.
fn hash_long(input: &[u8], out_len: usize) -> Vec<u8> {
    if out_len <= 64 {
        let mut state = Params::new().hash_length(out_len).to_state();
        state.update(&(out_len as u32).to_le_bytes());
        state.update(input);
        return state.finalize().as_bytes().to_vec();
    }
    let mut out = Vec::with_capacity(out_len);
    let mut state = Params::new().hash_length(64).to_state();
    state.update(&(out_len as u32).to_le_bytes());
    state.update(input);
    let mut v: [u8; 64] = [0; 64];
    v.copy_from_slice(state.finalize().as_bytes());

    let mut remaining = out_len;
    while remaining > 64 {
        out.extend_from_slice(&v[..32]);
        remaining -= 32;
        let next = Params::new().hash_length(64).to_state().update(&v).finalize();
        v.copy_from_slice(next.as_bytes());
    }
    out.extend_from_slice(&v[..remaining]);
    out
}

/// Runs all passes over the memory. Argon2d addressing: J1/J2 come from the
/// first word of the previous block.
pub fn fill_memory_blocks(context: &Context, memory: &mut Memory) {
    let lanes = context.config.lanes;
    let lane_length = context.lane_length;
    let segment_length = context.segment_length;

    for pass in 0..context.config.time_cost {
        for slice in 0..ARGON2_SYNC_POINTS {
            for lane in 0..lanes {
                let first = if pass == 0 && slice == 0 { 2 } else { 0 };
                for index in first..segment_length {
                    let cur = lane * lane_length + slice * segment_length + index;
                    let prev = if slice == 0 && index == 0 {
                        lane * lane_length + lane_length - 1
                    } else {
                        cur - 1
                    };
                    let rand = memory.blocks[prev as usize][0];
                    let ref_block = reference_index(
                        context,
                        pass,
                        slice,
                        lane,
                        index,
                        rand,
                    );
                    let compressed = compress(
                        &memory.blocks[prev as usize],
                        &memory.blocks[ref_block as usize],
                    );
                    let dst = &mut memory.blocks[cur as usize];
                    if pass == 0 {
                        *dst = compressed;
                    } else {
                        for (d, c) in dst.iter_mut().zip(compressed.iter()) {
                            *d ^= c;
                        }
                    }
                }
            }
        }
    }
}

fn reference_index(
    context: &Context,
    pass: u32,
    slice: u32,
    lane: u32,
    index: u32,
    rand: u64,
) -> u32 {
    let lanes = context.config.lanes;
    let lane_length = context.lane_length;
    let segment_length = context.segment_length;

    let j1 = rand as u32 as u64;
    let mut ref_lane = (rand >> 32) as u32 % lanes;
    if pass == 0 && slice == 0 {
        ref_lane = lane;
    }

    let ref_area_size: u32 = if pass == 0 {
        if slice == 0 {
            index - 1
        } else if ref_lane == lane {
            slice * segment_length + index - 1
        } else {
            slice * segment_length - if index == 0 { 1 } else { 0 }
        }
    } else if ref_lane == lane {
        lane_length - segment_length + index - 1
    } else {
        lane_length - segment_length - if index == 0 { 1 } else { 0 }
    };
    let ref_area_size = ref_area_size as u64;

    let x = (j1 * j1) >> 32;
    let y = (ref_area_size * x) >> 32;
    let z = ref_area_size - 1 - y;

    let start = if pass == 0 {
        0
    } else {
        (slice + 1) % ARGON2_SYNC_POINTS * segment_length
    };
    let ref_index = (start as u64 + z) % lane_length as u64;
    ref_lane * lane_length + ref_index as u32
}

fn compress(x: &Block, y: &Block) -> Block {
    let mut r = [0u64; 128];
    for i in 0..128 {
        r[i] = x[i] ^ y[i];
    }
    let mut z = r;
    for row in 0..8 {
        let b = row * 16;
        permute(
            &mut z,
            [
                b, b + 1, b + 2, b + 3, b + 4, b + 5, b + 6, b + 7,
                b + 8, b + 9, b + 10, b + 11, b + 12, b + 13, b + 14, b + 15,
            ],
        );
    }
    for col in 0..8 {
        let b = col * 2;
        permute(
            &mut z,
            [
                b, b + 1, b + 16, b + 17, b + 32, b + 33, b + 48, b + 49,
                b + 64, b + 65, b + 80, b + 81, b + 96, b + 97, b + 112, b + 113,
            ],
        );
    }
    for i in 0..128 {
        z[i] ^= r[i];
    }
    z
}

/// BLAKE2b round with the BlaMka multiplication term.
fn permute(v: &mut [u64; 128], i: [usize; 16]) {
    mix(v, i[0], i[4], i[8], i[12]);
    mix(v, i[1], i[5], i[9], i[13]);
    mix(v, i[2], i[6], i[10], i[14]);
    mix(v, i[3], i[7], i[11], i[15]);
    mix(v, i[0], i[5], i[10], i[15]);
    mix(v, i[1], i[6], i[11], i[12]);
    mix(v, i[2], i[7], i[8], i[13]);
    mix(v, i[3], i[4], i[9], i[14]);
}

fn mix(v: &mut [u64; 128], a: usize, b: usize, c: usize, d: usize) {
    v[a] = f_bla_mka(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = f_bla_mka(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = f_bla_mka(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = f_bla_mka(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

fn f_bla_mka(x: u64, y: u64) -> u64 {
    let m = (x as u32 as u64).wrapping_mul(y as u32 as u64);
    x.wrapping_add(y).wrapping_add(m.wrapping_mul(2))
}

use std::sync::Arc;

use blake2b_simd::{blake2b, Params};

use super::common::*;
use super::hash::{fill_aes_1rx4, fill_aes_4rx4, hash_aes_1rx4};
use super::memory::VmMemory;
use super::program::{
    compile_program, get_float_mask, get_small_positive_float_bits, Instr, IntSrc,
};
use super::softfloat::{RoundingMode, SoftFloat};

pub const LOW: usize = 0;
pub const HIGH: usize = 1;

/// Bit patterns of the sign and exponent banks flipped by FSCAL_R.
const SCALE_MASK: u64 = 0x80F0000000000000;

/// Float registers are stored as IEEE-754 binary64 bit patterns: the
/// interpreter XORs, masks and hashes them as raw words, and all arithmetic
/// goes through the soft-float engine anyway.
#[derive(Default)]
pub struct RegisterFile {
    pub r: [u64; REGISTER_COUNT],
    pub f: [[u64; 2]; REGISTER_COUNT_FLT],
    pub e: [[u64; 2]; REGISTER_COUNT_FLT],
    pub a: [[u64; 2]; REGISTER_COUNT_FLT],
}

pub struct Vm {
    pub reg: RegisterFile,
    scratchpad: Vec<u8>,
    mem: Arc<VmMemory>,
    rounding_mode: RoundingMode,
    e_mask: [u64; 2],
    read_reg: [usize; 4],
    dataset_offset: u64,
    ma: u64,
    mx: u64,
}

fn i32_to_f64_bits(x: u32) -> u64 {
    (x as i32 as f64).to_bits()
}

impl Vm {
    pub fn new(mem: Arc<VmMemory>) -> Vm {
        Vm {
            reg: RegisterFile::default(),
            scratchpad: vec![0; RANDOMX_SCRATCHPAD_L3],
            mem,
            rounding_mode: RoundingMode::NearestEven,
            e_mask: [0; 2],
            read_reg: [0; 4],
            dataset_offset: 0,
            ma: 0,
            mx: 0,
        }
    }

    /// 64-bit scratchpad read: big-endian bytes with the 32-bit halves
    /// swapped. The store below is its inverse, so r-register traffic
    /// round-trips.
    fn load64(&self, addr: u64) -> u64 {
        let at = addr as usize;
        u64::from_be_bytes(self.scratchpad[at..at + 8].try_into().unwrap()).rotate_left(32)
    }

    fn load32(&self, addr: u64) -> u32 {
        let at = addr as usize;
        u32::from_be_bytes(self.scratchpad[at..at + 4].try_into().unwrap())
    }

    fn store64(&mut self, addr: u64, value: u64) {
        let at = addr as usize;
        self.scratchpad[at..at + 8].copy_from_slice(&value.rotate_left(32).to_be_bytes());
    }

    fn int_src(&self, src: &IntSrc) -> u64 {
        match *src {
            IntSrc::Reg(i) => self.reg.r[i],
            IntSrc::Imm(v) => v,
        }
    }

    /// One program: expand the seed, configure the register file, compile,
    /// then run the 2048-iteration loop against scratchpad and dataset.
    pub fn run(&mut self, seed: &[u8; 64]) {
        let mut buffer = [0u8; 16 * 8 + RANDOMX_PROGRAM_SIZE * 8];
        fill_aes_4rx4(seed, &mut buffer);

        let mut entropy = [0u64; 16];
        for (i, word) in entropy.iter_mut().enumerate() {
            *word = u64::from_le_bytes(buffer[i * 8..i * 8 + 8].try_into().unwrap());
        }

        self.reg.r = [0; REGISTER_COUNT];
        for i in 0..REGISTER_COUNT_FLT {
            self.reg.a[i][LOW] = get_small_positive_float_bits(entropy[2 * i]);
            self.reg.a[i][HIGH] = get_small_positive_float_bits(entropy[2 * i + 1]);
        }

        self.ma = entropy[8] & CACHE_LINE_ALIGN_MASK;
        self.mx = entropy[10];
        let address_registers = entropy[12];
        self.read_reg[0] = (address_registers & 1) as usize;
        self.read_reg[1] = 2 + (address_registers >> 1 & 1) as usize;
        self.read_reg[2] = 4 + (address_registers >> 2 & 1) as usize;
        self.read_reg[3] = 6 + (address_registers >> 3 & 1) as usize;
        self.dataset_offset = entropy[13] % (DATASET_EXTRA_ITEMS + 1) * CACHE_LINE_SIZE;
        self.e_mask[LOW] = get_float_mask(entropy[14]);
        self.e_mask[HIGH] = get_float_mask(entropy[15]);

        let bytecode = compile_program(&buffer[16 * 8..]);

        let mut sp_addr0 = self.mx;
        let mut sp_addr1 = self.ma;

        for _ in 0..RANDOMX_PROGRAM_ITERATIONS {
            let sp_mix = self.reg.r[self.read_reg[0]] ^ self.reg.r[self.read_reg[1]];
            sp_addr0 ^= sp_mix;
            sp_addr0 &= SCRATCHPAD_L3_MASK64;
            sp_addr1 ^= sp_mix >> 32;
            sp_addr1 &= SCRATCHPAD_L3_MASK64;

            for i in 0..REGISTER_COUNT {
                self.reg.r[i] ^= self.load64(sp_addr0 + 8 * i as u64);
            }

            for i in 0..REGISTER_COUNT_FLT {
                self.reg.f[i][LOW] = i32_to_f64_bits(self.load32(sp_addr1 + 8 * i as u64));
                self.reg.f[i][HIGH] = i32_to_f64_bits(self.load32(sp_addr1 + 8 * i as u64 + 4));
            }

            for i in 0..REGISTER_COUNT_FLT {
                let at = sp_addr1 + 8 * (i + REGISTER_COUNT_FLT) as u64;
                let lo = i32_to_f64_bits(self.load32(at));
                let hi = i32_to_f64_bits(self.load32(at + 4));
                self.reg.e[i][LOW] = lo & DYNAMIC_MANTISSA_MASK | self.e_mask[LOW];
                self.reg.e[i][HIGH] = hi & DYNAMIC_MANTISSA_MASK | self.e_mask[HIGH];
            }

            self.execute_bytecode(&bytecode);

            self.mx ^= self.reg.r[self.read_reg[2]] ^ self.reg.r[self.read_reg[3]];
            self.mx &= CACHE_LINE_ALIGN_MASK;

            self.mem.dataset_read(self.dataset_offset + self.ma, &mut self.reg.r);
            std::mem::swap(&mut self.mx, &mut self.ma);

            for i in 0..REGISTER_COUNT {
                self.store64(sp_addr1 + 8 * i as u64, self.reg.r[i]);
            }

            for i in 0..REGISTER_COUNT_FLT {
                self.reg.f[i][LOW] ^= self.reg.e[i][LOW];
                self.reg.f[i][HIGH] ^= self.reg.e[i][HIGH];
                self.store64(sp_addr0 + 16 * i as u64, self.reg.f[i][LOW]);
                self.store64(sp_addr0 + 16 * i as u64 + 8, self.reg.f[i][HIGH]);
            }

            sp_addr0 = 0;
            sp_addr1 = 0;
        }
    }

    fn execute_bytecode(&mut self, bytecode: &[Instr]) {
        let mut pc: i32 = 0;
        while (pc as usize) < bytecode.len() {
            match &bytecode[pc as usize] {
                Instr::IaddRs { dst, src, shift, imm } => {
                    self.reg.r[*dst] = self.reg.r[*dst]
                        .wrapping_add((self.reg.r[*src] << shift).wrapping_add(*imm));
                }
                Instr::IaddM { dst, addr } => {
                    let v = self.load64(addr.address(&self.reg.r));
                    self.reg.r[*dst] = self.reg.r[*dst].wrapping_add(v);
                }
                Instr::IsubR { dst, src } => {
                    let v = self.int_src(src);
                    self.reg.r[*dst] = self.reg.r[*dst].wrapping_sub(v);
                }
                Instr::IsubM { dst, addr } => {
                    let v = self.load64(addr.address(&self.reg.r));
                    self.reg.r[*dst] = self.reg.r[*dst].wrapping_sub(v);
                }
                Instr::ImulR { dst, src } => {
                    let v = self.int_src(src);
                    self.reg.r[*dst] = self.reg.r[*dst].wrapping_mul(v);
                }
                Instr::ImulM { dst, addr } => {
                    let v = self.load64(addr.address(&self.reg.r));
                    self.reg.r[*dst] = self.reg.r[*dst].wrapping_mul(v);
                }
                Instr::ImulhR { dst, src } => {
                    self.reg.r[*dst] = mulh(self.reg.r[*dst], self.reg.r[*src]);
                }
                Instr::ImulhM { dst, addr } => {
                    let v = self.load64(addr.address(&self.reg.r));
                    self.reg.r[*dst] = mulh(self.reg.r[*dst], v);
                }
                Instr::IsmulhR { dst, src } => {
                    self.reg.r[*dst] =
                        smulh(self.reg.r[*dst] as i64, self.reg.r[*src] as i64) as u64;
                }
                Instr::IsmulhM { dst, addr } => {
                    let v = self.load64(addr.address(&self.reg.r));
                    self.reg.r[*dst] = smulh(self.reg.r[*dst] as i64, v as i64) as u64;
                }
                Instr::InegR { dst } => {
                    self.reg.r[*dst] = self.reg.r[*dst].wrapping_neg();
                }
                Instr::IxorR { dst, src } => {
                    self.reg.r[*dst] ^= self.int_src(src);
                }
                Instr::IxorM { dst, addr } => {
                    self.reg.r[*dst] ^= self.load64(addr.address(&self.reg.r));
                }
                Instr::IrorR { dst, src } => {
                    let v = self.int_src(src);
                    self.reg.r[*dst] = self.reg.r[*dst].rotate_right(v as u32 & 63);
                }
                Instr::IrolR { dst, src } => {
                    let v = self.int_src(src);
                    self.reg.r[*dst] = self.reg.r[*dst].rotate_left(v as u32 & 63);
                }
                Instr::IswapR { dst, src } => {
                    self.reg.r.swap(*dst, *src);
                }
                Instr::FswapR { dst } => {
                    if *dst < REGISTER_COUNT_FLT {
                        self.reg.f[*dst].swap(LOW, HIGH);
                    } else {
                        self.reg.e[*dst - REGISTER_COUNT_FLT].swap(LOW, HIGH);
                    }
                }
                Instr::FaddR { dst, src } => {
                    for lane in 0..2 {
                        self.reg.f[*dst][lane] = SoftFloat::from_bits(self.reg.f[*dst][lane])
                            .add(SoftFloat::from_bits(self.reg.a[*src][lane]), self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::FaddM { dst, addr } => {
                    let at = addr.address(&self.reg.r);
                    for lane in 0..2 {
                        let m = i32_to_f64_bits(self.load32(at + 4 * lane as u64));
                        self.reg.f[*dst][lane] = SoftFloat::from_bits(self.reg.f[*dst][lane])
                            .add(SoftFloat::from_bits(m), self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::FsubR { dst, src } => {
                    for lane in 0..2 {
                        self.reg.f[*dst][lane] = SoftFloat::from_bits(self.reg.f[*dst][lane])
                            .sub(SoftFloat::from_bits(self.reg.a[*src][lane]), self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::FsubM { dst, addr } => {
                    let at = addr.address(&self.reg.r);
                    for lane in 0..2 {
                        let m = i32_to_f64_bits(self.load32(at + 4 * lane as u64));
                        self.reg.f[*dst][lane] = SoftFloat::from_bits(self.reg.f[*dst][lane])
                            .sub(SoftFloat::from_bits(m), self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::FscalR { dst } => {
                    self.reg.f[*dst][LOW] ^= SCALE_MASK;
                    self.reg.f[*dst][HIGH] ^= SCALE_MASK;
                }
                Instr::FmulR { dst, src } => {
                    for lane in 0..2 {
                        self.reg.e[*dst][lane] = SoftFloat::from_bits(self.reg.e[*dst][lane])
                            .mul(SoftFloat::from_bits(self.reg.a[*src][lane]), self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::FdivM { dst, addr } => {
                    let at = addr.address(&self.reg.r);
                    for lane in 0..2 {
                        let raw = i32_to_f64_bits(self.load32(at + 4 * lane as u64));
                        let masked = raw & DYNAMIC_MANTISSA_MASK | self.e_mask[lane];
                        self.reg.e[*dst][lane] = SoftFloat::from_bits(self.reg.e[*dst][lane])
                            .div(SoftFloat::from_bits(masked), self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::FsqrtR { dst } => {
                    for lane in 0..2 {
                        self.reg.e[*dst][lane] = SoftFloat::from_bits(self.reg.e[*dst][lane])
                            .sqrt(self.rounding_mode)
                            .to_bits();
                    }
                }
                Instr::Cbranch { reg, imm, mask, target } => {
                    self.reg.r[*reg] = self.reg.r[*reg].wrapping_add(*imm);
                    if self.reg.r[*reg] & mask == 0 {
                        pc = *target;
                    }
                }
                Instr::Cfround { src, imm } => {
                    let bits = self.reg.r[*src].rotate_right(*imm as u32) % 4;
                    self.rounding_mode = RoundingMode::from_bits(bits);
                }
                Instr::Istore { dst, src, imm, mask } => {
                    let addr = self.reg.r[*dst].wrapping_add(*imm) & *mask as u64;
                    self.store64(addr, self.reg.r[*src]);
                }
                Instr::Nop => {}
            }
            pc += 1;
        }
    }

    /// Full RandomX hash: BLAKE2b-512 seed, AES scratchpad fill (which
    /// advances the seed), seven chained programs rolled through
    /// BLAKE2b-512, the final program, AES scratchpad compression and the
    /// closing BLAKE2b-256.
    pub fn calculate_hash(&mut self, input: &[u8]) -> blake2b_simd::Hash {
        self.rounding_mode = RoundingMode::NearestEven;

        let mut temp_hash = [0u8; 64];
        temp_hash.copy_from_slice(blake2b(input).as_bytes());
        fill_aes_1rx4(&mut temp_hash, &mut self.scratchpad);

        for _ in 0..RANDOMX_PROGRAM_COUNT - 1 {
            self.run(&temp_hash);

            let mut state = Params::new().hash_length(64).to_state();
            for v in &self.reg.r {
                state.update(&v.to_le_bytes());
            }
            for group in [&self.reg.f, &self.reg.e, &self.reg.a] {
                for pair in group {
                    state.update(&pair[LOW].to_le_bytes());
                    state.update(&pair[HIGH].to_le_bytes());
                }
            }
            temp_hash.copy_from_slice(state.finalize().as_bytes());
        }

        self.run(&temp_hash);

        let mut tail = [0u8; 64];
        hash_aes_1rx4(&self.scratchpad, &mut tail);

        // The `a` registers are deliberately absent from the final digest.
        let mut state = Params::new().hash_length(32).to_state();
        for v in &self.reg.r {
            state.update(&v.to_le_bytes());
        }
        for group in [&self.reg.f, &self.reg.e] {
            for pair in group {
                state.update(&pair[LOW].to_le_bytes());
                state.update(&pair[HIGH].to_le_bytes());
            }
        }
        state.update(&tail);
        state.finalize()
    }
}

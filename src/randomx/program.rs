//! Program-text decoding: entropy-derived register setup values and the
//! compiler that turns 2 KiB of program bytes into dense bytecode.
//!
//! Each 8-byte instruction word carries opcode, dst, src, mod and a 32-bit
//! immediate. The opcode byte selects the operation by fixed frequency
//! ranges. Operand descriptors stay separate per family: integer ops resolve
//! either a register or a folded immediate, memory ops a masked scratchpad
//! address, float ops a register pair index.

use super::common::*;

/// Positive double with entropy-selected exponent in [1023, 1054] and
/// entropy mantissa. Seeds the `a` register group.
pub fn get_small_positive_float_bits(entropy: u64) -> u64 {
    let mut exponent = entropy >> 59;
    let mantissa = entropy & MANTISSA_MASK;
    exponent += EXPONENT_BIAS;
    exponent &= EXPONENT_MASK;
    exponent << MANTISSA_SIZE | mantissa
}

fn get_static_exponent(entropy: u64) -> u64 {
    let mut exponent = CONST_EXPONENT_BITS;
    exponent |= (entropy >> (64 - STATIC_EXPONENT_BITS)) << DYNAMIC_EXPONENT_BITS;
    exponent << MANTISSA_SIZE
}

/// OR-mask reseeding the `e` registers: 22 entropy mantissa bits plus the
/// static exponent. The nonzero exponent is what keeps FDIV_M away from
/// zero divisors and NaNs.
pub fn get_float_mask(entropy: u64) -> u64 {
    (entropy & MASK_22BIT) | get_static_exponent(entropy)
}

/// Integer operand: a register, or the sign-extended immediate when the
/// instruction encodes src == dst.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntSrc {
    Reg(usize),
    Imm(u64),
}

/// Masked scratchpad address. `src == None` is the constant-address form
/// (src == dst in the instruction word), which always selects the L3 tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemAddr {
    pub src: Option<usize>,
    pub imm: u64,
    pub mask: u32,
}

impl MemAddr {
    fn int_op(src: usize, dst: usize, mod_: u8, imm: u32) -> MemAddr {
        if src != dst {
            MemAddr {
                src: Some(src),
                imm: sign_extend_2s_compl(imm),
                mask: l1_or_l2(mod_),
            }
        } else {
            MemAddr {
                src: None,
                imm: sign_extend_2s_compl(imm),
                mask: SCRATCHPAD_L3_MASK,
            }
        }
    }

    fn float_op(src: usize, mod_: u8, imm: u32) -> MemAddr {
        MemAddr {
            src: Some(src),
            imm: sign_extend_2s_compl(imm),
            mask: l1_or_l2(mod_),
        }
    }

    pub fn address(&self, r: &[u64; REGISTER_COUNT]) -> u64 {
        let base = self.src.map_or(0, |i| r[i]);
        base.wrapping_add(self.imm) & self.mask as u64
    }
}

fn l1_or_l2(mod_: u8) -> u32 {
    if mod_ % 4 != 0 {
        SCRATCHPAD_L1_MASK
    } else {
        SCRATCHPAD_L2_MASK
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    IaddRs { dst: usize, src: usize, shift: u32, imm: u64 },
    IaddM { dst: usize, addr: MemAddr },
    IsubR { dst: usize, src: IntSrc },
    IsubM { dst: usize, addr: MemAddr },
    ImulR { dst: usize, src: IntSrc },
    ImulM { dst: usize, addr: MemAddr },
    ImulhR { dst: usize, src: usize },
    ImulhM { dst: usize, addr: MemAddr },
    IsmulhR { dst: usize, src: usize },
    IsmulhM { dst: usize, addr: MemAddr },
    InegR { dst: usize },
    IxorR { dst: usize, src: IntSrc },
    IxorM { dst: usize, addr: MemAddr },
    IrorR { dst: usize, src: IntSrc },
    IrolR { dst: usize, src: IntSrc },
    IswapR { dst: usize, src: usize },
    FswapR { dst: usize },
    FaddR { dst: usize, src: usize },
    FaddM { dst: usize, addr: MemAddr },
    FsubR { dst: usize, src: usize },
    FsubM { dst: usize, addr: MemAddr },
    FscalR { dst: usize },
    FmulR { dst: usize, src: usize },
    FdivM { dst: usize, addr: MemAddr },
    FsqrtR { dst: usize },
    Cbranch { reg: usize, imm: u64, mask: u64, target: i32 },
    Cfround { src: usize, imm: u64 },
    Istore { dst: usize, src: usize, imm: u64, mask: u32 },
    Nop,
}

fn int_src(src: usize, dst: usize, imm: u32) -> IntSrc {
    if src != dst {
        IntSrc::Reg(src)
    } else {
        IntSrc::Imm(sign_extend_2s_compl(imm))
    }
}

/// Compiles the 2048 program bytes into 256 bytecode entries.
///
/// `register_usage` tracks the index of the last instruction that wrote each
/// integer register. A CBRANCH snapshots its register's entry as the branch
/// target and then claims every register, so later branches can never jump
/// back across it.
pub fn compile_program(program: &[u8]) -> Vec<Instr> {
    debug_assert_eq!(program.len(), RANDOMX_PROGRAM_SIZE * 8);

    let mut register_usage = [-1i32; REGISTER_COUNT];
    let mut bytecode = Vec::with_capacity(RANDOMX_PROGRAM_SIZE);

    for i in 0..RANDOMX_PROGRAM_SIZE {
        let word = &program[i * 8..i * 8 + 8];
        let opcode = word[0];
        let dst = word[1] as usize % REGISTER_COUNT;
        let src = word[2] as usize % REGISTER_COUNT;
        let fdst = word[1] as usize % REGISTER_COUNT_FLT;
        let fsrc = word[2] as usize % REGISTER_COUNT_FLT;
        let mod_ = word[3];
        let imm = u32::from_le_bytes(word[4..8].try_into().unwrap());

        let instr = match opcode {
            0..=15 => {
                register_usage[dst] = i as i32;
                Instr::IaddRs {
                    dst,
                    src,
                    shift: ((mod_ >> 2) % 4) as u32,
                    imm: if dst == REGISTER_NEEDS_DISPLACEMENT {
                        sign_extend_2s_compl(imm)
                    } else {
                        0
                    },
                }
            }
            16..=22 => {
                register_usage[dst] = i as i32;
                Instr::IaddM { dst, addr: MemAddr::int_op(src, dst, mod_, imm) }
            }
            23..=38 => {
                register_usage[dst] = i as i32;
                Instr::IsubR { dst, src: int_src(src, dst, imm) }
            }
            39..=45 => {
                register_usage[dst] = i as i32;
                Instr::IsubM { dst, addr: MemAddr::int_op(src, dst, mod_, imm) }
            }
            46..=61 => {
                register_usage[dst] = i as i32;
                Instr::ImulR { dst, src: int_src(src, dst, imm) }
            }
            62..=65 => {
                register_usage[dst] = i as i32;
                Instr::ImulM { dst, addr: MemAddr::int_op(src, dst, mod_, imm) }
            }
            66..=69 => {
                register_usage[dst] = i as i32;
                Instr::ImulhR { dst, src }
            }
            70 => {
                register_usage[dst] = i as i32;
                Instr::ImulhM { dst, addr: MemAddr::int_op(src, dst, mod_, imm) }
            }
            71..=74 => {
                register_usage[dst] = i as i32;
                Instr::IsmulhR { dst, src }
            }
            75 => {
                register_usage[dst] = i as i32;
                Instr::IsmulhM { dst, addr: MemAddr::int_op(src, dst, mod_, imm) }
            }
            76..=83 => {
                // Folded into a plain multiply by the precomputed reciprocal;
                // zero and powers of two are no-ops.
                if !is_zero_or_power_of_2(imm as u64) {
                    register_usage[dst] = i as i32;
                    Instr::ImulR {
                        dst,
                        src: IntSrc::Imm(randomx_reciprocal(imm as u64)),
                    }
                } else {
                    Instr::Nop
                }
            }
            84..=85 => {
                register_usage[dst] = i as i32;
                Instr::InegR { dst }
            }
            86..=100 => {
                register_usage[dst] = i as i32;
                Instr::IxorR { dst, src: int_src(src, dst, imm) }
            }
            101..=105 => {
                register_usage[dst] = i as i32;
                Instr::IxorM { dst, addr: MemAddr::int_op(src, dst, mod_, imm) }
            }
            106..=113 => {
                register_usage[dst] = i as i32;
                Instr::IrorR { dst, src: int_src(src, dst, imm) }
            }
            114..=115 => {
                register_usage[dst] = i as i32;
                Instr::IrolR { dst, src: int_src(src, dst, imm) }
            }
            116..=119 => {
                if src != dst {
                    register_usage[dst] = i as i32;
                    register_usage[src] = i as i32;
                    Instr::IswapR { dst, src }
                } else {
                    Instr::Nop
                }
            }
            120..=123 => Instr::FswapR { dst },
            124..=139 => Instr::FaddR { dst: fdst, src: fsrc },
            140..=144 => Instr::FaddM { dst: fdst, addr: MemAddr::float_op(src, mod_, imm) },
            145..=160 => Instr::FsubR { dst: fdst, src: fsrc },
            161..=165 => Instr::FsubM { dst: fdst, addr: MemAddr::float_op(src, mod_, imm) },
            166..=171 => Instr::FscalR { dst: fdst },
            172..=203 => Instr::FmulR { dst: fdst, src: fsrc },
            204..=207 => Instr::FdivM { dst: fdst, addr: MemAddr::float_op(src, mod_, imm) },
            208..=213 => Instr::FsqrtR { dst: fdst },
            214..=238 => {
                let shift = (mod_ >> 4) as u32 + CONDITION_OFFSET;
                let mut cond_imm = sign_extend_2s_compl(imm) | 1u64 << shift;
                cond_imm &= !(1u64 << (shift - 1));
                let instr = Instr::Cbranch {
                    reg: dst,
                    imm: cond_imm,
                    mask: (CONDITION_MASK as u64) << shift,
                    target: register_usage[dst],
                };
                for usage in register_usage.iter_mut() {
                    *usage = i as i32;
                }
                instr
            }
            239 => Instr::Cfround { src, imm: (imm & 63) as u64 },
            240..=255 => {
                let mask = if mod_ >> 4 < STORE_L3_CONDITION {
                    l1_or_l2(mod_)
                } else {
                    SCRATCHPAD_L3_MASK
                };
                Instr::Istore { dst, src, imm: sign_extend_2s_compl(imm), mask }
            }
        };
        bytecode.push(instr);
    }
    bytecode
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(opcode: u8, dst: u8, src: u8, mod_: u8, imm: u32) -> [u8; 8] {
        let mut word = [0u8; 8];
        word[0] = opcode;
        word[1] = dst;
        word[2] = src;
        word[3] = mod_;
        word[4..8].copy_from_slice(&imm.to_le_bytes());
        word
    }

    fn compile_single(word: [u8; 8]) -> Instr {
        let mut program = vec![0u8; RANDOMX_PROGRAM_SIZE * 8];
        program[..8].copy_from_slice(&word);
        compile_program(&program)[0]
    }

    #[test]
    fn iadd_rs_displacement_register() {
        // Only r5 as destination folds the immediate in.
        let plain = compile_single(encode(3, 1, 2, 0b1100, 0xdeadbeef));
        assert_eq!(plain, Instr::IaddRs { dst: 1, src: 2, shift: 3, imm: 0 });

        let disp = compile_single(encode(3, 5, 2, 0b0100, 0x80000001));
        assert_eq!(
            disp,
            Instr::IaddRs { dst: 5, src: 2, shift: 1, imm: 0xffffffff80000001 }
        );
    }

    #[test]
    fn memory_mask_tiers() {
        // mod % 4 != 0 selects L1, otherwise L2; src == dst forces L3 with a
        // constant address.
        let l1 = compile_single(encode(16, 0, 1, 1, 64));
        assert_eq!(
            l1,
            Instr::IaddM {
                dst: 0,
                addr: MemAddr { src: Some(1), imm: 64, mask: SCRATCHPAD_L1_MASK }
            }
        );
        let l2 = compile_single(encode(16, 0, 1, 4, 64));
        assert_eq!(
            l2,
            Instr::IaddM {
                dst: 0,
                addr: MemAddr { src: Some(1), imm: 64, mask: SCRATCHPAD_L2_MASK }
            }
        );
        let l3 = compile_single(encode(16, 1, 1, 1, 64));
        assert_eq!(
            l3,
            Instr::IaddM { dst: 1, addr: MemAddr { src: None, imm: 64, mask: SCRATCHPAD_L3_MASK } }
        );
    }

    #[test]
    fn register_or_immediate_source() {
        let reg = compile_single(encode(23, 0, 1, 0, 99));
        assert_eq!(reg, Instr::IsubR { dst: 0, src: IntSrc::Reg(1) });
        let imm = compile_single(encode(23, 1, 1, 0, 0xffffffff));
        assert_eq!(imm, Instr::IsubR { dst: 1, src: IntSrc::Imm(u64::MAX) });
    }

    #[test]
    fn imul_rcp_compiles_to_multiply_or_nop() {
        assert_eq!(compile_single(encode(76, 2, 0, 0, 0)), Instr::Nop);
        assert_eq!(compile_single(encode(76, 2, 0, 0, 64)), Instr::Nop);
        assert_eq!(
            compile_single(encode(76, 2, 0, 0, 3)),
            Instr::ImulR { dst: 2, src: IntSrc::Imm(randomx_reciprocal(3)) }
        );
    }

    #[test]
    fn iswap_same_register_is_nop() {
        assert_eq!(compile_single(encode(116, 3, 3, 0, 0)), Instr::Nop);
        assert_eq!(compile_single(encode(116, 3, 4, 0, 0)), Instr::IswapR { dst: 3, src: 4 });
    }

    #[test]
    fn cbranch_targets_last_writer() {
        let mut program = vec![0u8; RANDOMX_PROGRAM_SIZE * 8];
        // 0: IXOR_R r3, r1 ; 1: ISUB_R r0, r1 ; 2: CBRANCH on r3 ; 3: CBRANCH on r0
        program[0..8].copy_from_slice(&encode(86, 3, 1, 0, 0));
        program[8..16].copy_from_slice(&encode(23, 0, 1, 0, 0));
        program[16..24].copy_from_slice(&encode(214, 3, 0, 0x20, 0));
        program[24..32].copy_from_slice(&encode(214, 0, 0, 0, 0));
        let code = compile_program(&program);

        match code[2] {
            Instr::Cbranch { reg, target, mask, imm } => {
                assert_eq!(reg, 3);
                assert_eq!(target, 0);
                // mod >> 4 = 2, shift = 10: condition mask is 0xff << 10 and
                // bit 10 of the immediate is set while bit 9 is cleared.
                assert_eq!(mask, 0xffu64 << 10);
                assert_eq!(imm & 1 << 10, 1 << 10);
                assert_eq!(imm & 1 << 9, 0);
            }
            other => panic!("expected CBRANCH, got {:?}", other),
        }
        // The first branch claimed every register, so the second targets it.
        match code[3] {
            Instr::Cbranch { reg, target, .. } => {
                assert_eq!(reg, 0);
                assert_eq!(target, 2);
            }
            other => panic!("expected CBRANCH, got {:?}", other),
        }
    }

    #[test]
    fn istore_condition_selects_l3() {
        let l1 = compile_single(encode(240, 0, 1, 0x01, 0));
        assert_eq!(l1, Instr::Istore { dst: 0, src: 1, imm: 0, mask: SCRATCHPAD_L1_MASK });
        let l3 = compile_single(encode(240, 0, 1, 0xe0, 0));
        assert_eq!(l3, Instr::Istore { dst: 0, src: 1, imm: 0, mask: SCRATCHPAD_L3_MASK });
    }

    #[test]
    fn small_positive_float_layout() {
        let mut x = 0x123456789abcdefu64;
        for _ in 0..64 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            let bits = get_small_positive_float_bits(x);
            assert_eq!(bits >> 63, 0, "sign must be positive");
            let exponent = bits >> MANTISSA_SIZE & EXPONENT_MASK;
            assert!((1023..=1054).contains(&exponent));
        }
    }

    #[test]
    fn float_mask_exponent_bits() {
        let mask = get_float_mask(u64::MAX);
        // Static exponent 0x300 | 0xf0, full 22-bit mantissa.
        assert_eq!(mask, (0x3f0u64 << 52) | MASK_22BIT);
        let mask0 = get_float_mask(0);
        assert_eq!(mask0, 0x300u64 << 52);
    }
}

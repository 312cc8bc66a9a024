//! SuperscalarHash: the keyed program generator and its executor.
//!
//! The generator emits a random integer program shaped by a simulated 3-port
//! out-of-order pipeline (decode buffers, port pressure, operand readiness).
//! Every random draw comes from the Blake2Generator, so the draw order is
//! part of the algorithm: reordering a single `get_byte` changes every
//! program derived from a key.

use blake2b_simd::blake2b;

use super::common::{
    mulh, randomx_reciprocal, sign_extend_2s_compl, smulh, RANDOMX_SUPERSCALAR_LATENCY,
    REGISTER_NEEDS_DISPLACEMENT, SUPERSCALAR_MAX_SIZE,
};

/// BLAKE2b-512 backed byte/word stream seeded with (key, nonce).
pub struct Blake2Generator {
    data: [u8; 64],
    index: usize,
}

impl Blake2Generator {
    pub fn new(key: &[u8], nonce: u32) -> Blake2Generator {
        let mut data = [0u8; 64];
        let n = key.len().min(60);
        data[..n].copy_from_slice(&key[..n]);
        data[60..].copy_from_slice(&nonce.to_le_bytes());
        // The cursor starts exhausted: the first request hashes the buffer.
        Blake2Generator { data, index: 64 }
    }

    fn refill_if_needed(&mut self, bytes_needed: usize) {
        if self.index + bytes_needed > self.data.len() {
            let h = blake2b(&self.data);
            self.data.copy_from_slice(h.as_bytes());
            self.index = 0;
        }
    }

    pub fn get_byte(&mut self) -> u8 {
        self.refill_if_needed(1);
        let b = self.data[self.index];
        self.index += 1;
        b
    }

    pub fn get_u32(&mut self) -> u32 {
        self.refill_if_needed(4);
        let v = u32::from_le_bytes(self.data[self.index..self.index + 4].try_into().unwrap());
        self.index += 4;
        v
    }
}

// Execution port bitmasks.
const P0: u8 = 1;
const P1: u8 = 2;
const P5: u8 = 4;
const P01: u8 = P0 | P1;
const P05: u8 = P0 | P5;
const P015: u8 = P0 | P1 | P5;

#[derive(Clone, Copy)]
struct MacroOp {
    latency: usize,
    uop1: u8,
    uop2: u8,
    dependent: bool,
}

impl MacroOp {
    const fn simple(latency: usize, port: u8) -> MacroOp {
        MacroOp { latency, uop1: port, uop2: 0, dependent: false }
    }

    fn is_eliminated(&self) -> bool {
        self.uop1 == 0
    }

    fn is_simple(&self) -> bool {
        self.uop2 == 0
    }
}

const M_MOV_RR: MacroOp = MacroOp { latency: 0, uop1: 0, uop2: 0, dependent: false };
const M_SUB_RR: MacroOp = MacroOp::simple(1, P015);
const M_XOR_RR: MacroOp = MacroOp::simple(1, P015);
const M_LEA_SIB: MacroOp = MacroOp::simple(1, P01);
const M_IMUL_RR: MacroOp = MacroOp::simple(3, P1);
const M_ROR_RI: MacroOp = MacroOp::simple(1, P05);
const M_ADD_RI: MacroOp = MacroOp::simple(1, P015);
const M_XOR_RI: MacroOp = MacroOp::simple(1, P015);
const M_MOV_RI64: MacroOp = MacroOp::simple(1, P015);
const M_MUL_R: MacroOp = MacroOp { latency: 4, uop1: P1, uop2: P5, dependent: false };
const M_IMUL_R: MacroOp = MacroOp { latency: 4, uop1: P1, uop2: P5, dependent: false };
// The multiply of IMUL_RCP depends on the preceding 64-bit immediate load.
const M_IMUL_R_DEPENDENT: MacroOp = MacroOp { latency: 3, uop1: P1, uop2: 0, dependent: true };

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScOp {
    ISubR,
    IXorR,
    IAddRs,
    IMulR,
    IRorC,
    IAddC7,
    IXorC7,
    IAddC8,
    IXorC8,
    IAddC9,
    IXorC9,
    IMulhR,
    ISmulhR,
    IMulRcp,
}

struct ScTemplate {
    mops: &'static [MacroOp],
    src_op: i32,
    dst_op: i32,
    result_op: i32,
}

const TPL_ISUB_R: ScTemplate = ScTemplate { mops: &[M_SUB_RR], src_op: 0, dst_op: 0, result_op: 0 };
const TPL_IXOR_R: ScTemplate = ScTemplate { mops: &[M_XOR_RR], src_op: 0, dst_op: 0, result_op: 0 };
const TPL_IADD_RS: ScTemplate = ScTemplate { mops: &[M_LEA_SIB], src_op: 0, dst_op: 0, result_op: 0 };
const TPL_IMUL_R: ScTemplate = ScTemplate { mops: &[M_IMUL_RR], src_op: 0, dst_op: 0, result_op: 0 };
const TPL_IROR_C: ScTemplate = ScTemplate { mops: &[M_ROR_RI], src_op: -1, dst_op: 0, result_op: 0 };
const TPL_IADD_C: ScTemplate = ScTemplate { mops: &[M_ADD_RI], src_op: -1, dst_op: 0, result_op: 0 };
const TPL_IXOR_C: ScTemplate = ScTemplate { mops: &[M_XOR_RI], src_op: -1, dst_op: 0, result_op: 0 };
const TPL_IMULH_R: ScTemplate = ScTemplate {
    mops: &[M_MOV_RR, M_MUL_R, M_MOV_RR],
    src_op: 1,
    dst_op: 0,
    result_op: 1,
};
const TPL_ISMULH_R: ScTemplate = ScTemplate {
    mops: &[M_MOV_RR, M_IMUL_R, M_MOV_RR],
    src_op: 1,
    dst_op: 0,
    result_op: 1,
};
const TPL_IMUL_RCP: ScTemplate = ScTemplate {
    mops: &[M_MOV_RI64, M_IMUL_R_DEPENDENT],
    src_op: -1,
    dst_op: 1,
    result_op: 1,
};

fn template(op: ScOp) -> &'static ScTemplate {
    match op {
        ScOp::ISubR => &TPL_ISUB_R,
        ScOp::IXorR => &TPL_IXOR_R,
        ScOp::IAddRs => &TPL_IADD_RS,
        ScOp::IMulR => &TPL_IMUL_R,
        ScOp::IRorC => &TPL_IROR_C,
        ScOp::IAddC7 | ScOp::IAddC8 | ScOp::IAddC9 => &TPL_IADD_C,
        ScOp::IXorC7 | ScOp::IXorC8 | ScOp::IXorC9 => &TPL_IXOR_C,
        ScOp::IMulhR => &TPL_IMULH_R,
        ScOp::ISmulhR => &TPL_ISMULH_R,
        ScOp::IMulRcp => &TPL_IMUL_RCP,
    }
}

// Decode buffers: how 16 fetched bytes split into instruction slots.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Decoder {
    D484,
    D7333,
    D3733,
    D493,
    D4444,
    D3310,
}

impl Decoder {
    fn slots(self) -> &'static [usize] {
        match self {
            Decoder::D484 => &[4, 8, 4],
            Decoder::D7333 => &[7, 3, 3, 3],
            Decoder::D3733 => &[3, 7, 3, 3],
            Decoder::D493 => &[4, 9, 3],
            Decoder::D4444 => &[4, 4, 4, 4],
            Decoder::D3310 => &[3, 3, 10],
        }
    }
}

/// Decode-buffer selection. The wide multiplies force the 3-3-10 shape, an
/// under-saturated multiply port forces 4-4-4-4, and IMUL_RCP steers toward
/// the buffers with a second 64-bit immediate slot.
fn fetch_next_decoder(
    last_op: Option<ScOp>,
    decode_cycle: usize,
    mul_count: usize,
    gen: &mut Blake2Generator,
) -> Decoder {
    if last_op == Some(ScOp::IMulhR) || last_op == Some(ScOp::ISmulhR) {
        return Decoder::D3310;
    }
    if mul_count < decode_cycle + 1 {
        return Decoder::D4444;
    }
    if last_op == Some(ScOp::IMulRcp) {
        return if gen.get_byte() & 1 == 1 { Decoder::D484 } else { Decoder::D493 };
    }
    match gen.get_byte() & 3 {
        0 => Decoder::D484,
        1 => Decoder::D7333,
        2 => Decoder::D3733,
        _ => Decoder::D493,
    }
}

const SLOT_3: [ScOp; 2] = [ScOp::ISubR, ScOp::IXorR];
const SLOT_3L: [ScOp; 4] = [ScOp::ISubR, ScOp::IXorR, ScOp::IMulhR, ScOp::ISmulhR];
const SLOT_4: [ScOp; 2] = [ScOp::IRorC, ScOp::IAddRs];
const SLOT_7: [ScOp; 2] = [ScOp::IXorC7, ScOp::IAddC7];
const SLOT_8: [ScOp; 2] = [ScOp::IXorC8, ScOp::IAddC8];
const SLOT_9: [ScOp; 2] = [ScOp::IXorC9, ScOp::IAddC9];

/// Instruction under construction; `dst`/`src` are -1 until selected.
struct SsInstr {
    op: ScOp,
    dst: i32,
    src: i32,
    mod_: u8,
    imm32: u32,
    op_group: ScOp,
    op_group_par: i64,
    group_par_is_source: bool,
    can_reuse: bool,
}

fn create(op: ScOp, gen: &mut Blake2Generator) -> SsInstr {
    let mut ins = SsInstr {
        op,
        dst: -1,
        src: -1,
        mod_: 0,
        imm32: 0,
        op_group: op,
        op_group_par: -1,
        group_par_is_source: false,
        can_reuse: false,
    };
    match op {
        ScOp::ISubR => {
            ins.op_group = ScOp::IAddRs;
            ins.group_par_is_source = true;
        }
        ScOp::IXorR => {
            ins.op_group = ScOp::IXorR;
            ins.group_par_is_source = true;
        }
        ScOp::IAddRs => {
            ins.mod_ = gen.get_byte();
            ins.op_group = ScOp::IAddRs;
            ins.group_par_is_source = true;
        }
        ScOp::IMulR => {
            ins.op_group = ScOp::IMulR;
            ins.group_par_is_source = true;
        }
        ScOp::IRorC => {
            loop {
                ins.imm32 = (gen.get_byte() & 63) as u32;
                if ins.imm32 != 0 {
                    break;
                }
            }
            ins.op_group = ScOp::IRorC;
        }
        ScOp::IAddC7 | ScOp::IAddC8 | ScOp::IAddC9 => {
            ins.imm32 = gen.get_u32();
            ins.op_group = ScOp::IAddC7;
        }
        ScOp::IXorC7 | ScOp::IXorC8 | ScOp::IXorC9 => {
            ins.imm32 = gen.get_u32();
            ins.op_group = ScOp::IXorC7;
        }
        ScOp::IMulhR => {
            ins.can_reuse = true;
            ins.op_group = ScOp::IMulhR;
            ins.op_group_par = gen.get_u32() as i64;
        }
        ScOp::ISmulhR => {
            ins.can_reuse = true;
            ins.op_group = ScOp::ISmulhR;
            ins.op_group_par = gen.get_u32() as i64;
        }
        ScOp::IMulRcp => {
            loop {
                ins.imm32 = gen.get_u32();
                if ins.imm32 & ins.imm32.wrapping_sub(1) != 0 {
                    break;
                }
            }
            ins.op_group = ScOp::IMulRcp;
        }
    }
    ins
}

fn create_for_slot(
    gen: &mut Blake2Generator,
    slot_len: usize,
    decoder: Decoder,
    is_last: bool,
) -> SsInstr {
    match slot_len {
        3 if is_last => create(SLOT_3L[(gen.get_byte() & 3) as usize], gen),
        3 => create(SLOT_3[(gen.get_byte() & 1) as usize], gen),
        4 => {
            // The 4-4-4-4 buffer exists to feed the multiply port.
            if decoder == Decoder::D4444 && !is_last {
                create(ScOp::IMulR, gen)
            } else {
                create(SLOT_4[(gen.get_byte() & 1) as usize], gen)
            }
        }
        7 => create(SLOT_7[(gen.get_byte() & 1) as usize], gen),
        8 => create(SLOT_8[(gen.get_byte() & 1) as usize], gen),
        9 => create(SLOT_9[(gen.get_byte() & 1) as usize], gen),
        10 => create(ScOp::IMulRcp, gen),
        _ => unreachable!("no such instruction slot"),
    }
}

const CYCLE_MAP_SIZE: usize = RANDOMX_SUPERSCALAR_LATENCY + 4;
const LOOK_FORWARD_CYCLES: usize = 4;
const MAX_THROWAWAY_COUNT: usize = 256;

type PortBusy = [[u8; 3]; CYCLE_MAP_SIZE];

/// Earliest cycle >= `cycle` with a matching free port. The scan order
/// P5, P0, P1 is observable through the generated programs.
fn schedule_uop(uop: u8, port_busy: &mut PortBusy, mut cycle: usize, commit: bool) -> Option<usize> {
    while cycle < CYCLE_MAP_SIZE {
        if uop & P5 != 0 && port_busy[cycle][2] == 0 {
            if commit {
                port_busy[cycle][2] = uop;
            }
            return Some(cycle);
        }
        if uop & P0 != 0 && port_busy[cycle][0] == 0 {
            if commit {
                port_busy[cycle][0] = uop;
            }
            return Some(cycle);
        }
        if uop & P1 != 0 && port_busy[cycle][1] == 0 {
            if commit {
                port_busy[cycle][1] = uop;
            }
            return Some(cycle);
        }
        cycle += 1;
    }
    None
}

fn schedule_mop(
    mop: &MacroOp,
    port_busy: &mut PortBusy,
    cycle: usize,
    dep_cycle: usize,
    commit: bool,
) -> Option<usize> {
    let mut cycle = if mop.dependent { cycle.max(dep_cycle) } else { cycle };
    if mop.is_eliminated() {
        return Some(cycle);
    }
    if mop.is_simple() {
        return schedule_uop(mop.uop1, port_busy, cycle, commit);
    }
    // Both uops must issue in the same cycle on distinct ports.
    while cycle < CYCLE_MAP_SIZE {
        let c1 = schedule_uop(mop.uop1, port_busy, cycle, false);
        let c2 = schedule_uop(mop.uop2, port_busy, cycle, false);
        if c1.is_some() && c1 == c2 {
            if commit {
                schedule_uop(mop.uop1, port_busy, cycle, true);
                schedule_uop(mop.uop2, port_busy, cycle, true);
            }
            return c1;
        }
        cycle += 1;
    }
    None
}

#[derive(Clone, Copy)]
struct RegInfo {
    latency: usize,
    last_op_group: Option<ScOp>,
    last_op_par: i64,
}

impl Default for RegInfo {
    fn default() -> RegInfo {
        RegInfo { latency: 0, last_op_group: None, last_op_par: 0 }
    }
}

fn select_register(available: &[usize], gen: &mut Blake2Generator) -> Option<usize> {
    if available.is_empty() {
        return None;
    }
    let index = if available.len() > 1 {
        gen.get_u32() as usize % available.len()
    } else {
        0
    };
    Some(available[index])
}

fn select_source(
    ins: &mut SsInstr,
    cycle: usize,
    regs: &[RegInfo; 8],
    gen: &mut Blake2Generator,
) -> bool {
    let mut available = Vec::with_capacity(8);
    for (i, reg) in regs.iter().enumerate() {
        if reg.latency <= cycle {
            available.push(i);
        }
    }

    // With exactly two candidates and r5 among them, IADD_RS takes r5 as the
    // source so the displacement register stays usable as a destination.
    if available.len() == 2
        && ins.op == ScOp::IAddRs
        && (available[0] == REGISTER_NEEDS_DISPLACEMENT || available[1] == REGISTER_NEEDS_DISPLACEMENT)
    {
        ins.src = REGISTER_NEEDS_DISPLACEMENT as i32;
        ins.op_group_par = ins.src as i64;
        return true;
    }

    match select_register(&available, gen) {
        Some(reg) => {
            ins.src = reg as i32;
            if ins.group_par_is_source {
                ins.op_group_par = ins.src as i64;
            }
            true
        }
        None => false,
    }
}

fn select_destination(
    ins: &mut SsInstr,
    cycle: usize,
    allow_chained_mul: bool,
    regs: &[RegInfo; 8],
    gen: &mut Blake2Generator,
) -> bool {
    let mut available = Vec::with_capacity(8);
    for (i, reg) in regs.iter().enumerate() {
        if reg.latency <= cycle
            && (ins.can_reuse || i as i32 != ins.src)
            && (allow_chained_mul
                || ins.op_group != ScOp::IMulR
                || reg.last_op_group != Some(ScOp::IMulR))
            && (reg.last_op_group != Some(ins.op_group) || reg.last_op_par != ins.op_group_par)
            && (ins.op != ScOp::IAddRs || i != REGISTER_NEEDS_DISPLACEMENT)
        {
            available.push(i);
        }
    }
    match select_register(&available, gen) {
        Some(reg) => {
            ins.dst = reg as i32;
            true
        }
        None => false,
    }
}

/// One committed superscalar instruction. `imm` is precomputed per op: the
/// sign-extended constant for the C variants, the rotation count for IROR_C
/// and the 64-bit reciprocal for IMUL_RCP.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScInstr {
    pub op: ScOp,
    pub dst: usize,
    pub src: usize,
    pub mod_: u8,
    pub imm: u64,
}

pub struct ScProgram {
    pub instructions: Vec<ScInstr>,
    pub address_reg: usize,
}

impl ScProgram {
    pub fn generate(gen: &mut Blake2Generator) -> ScProgram {
        let mut port_busy: PortBusy = [[0; 3]; CYCLE_MAP_SIZE];
        let mut regs = [RegInfo::default(); 8];
        let mut program: Vec<ScInstr> = Vec::with_capacity(SUPERSCALAR_MAX_SIZE);

        let mut cycle = 0usize;
        let mut dep_cycle = 0usize;
        let mut mul_count = 0usize;
        let mut ports_saturated = false;
        let mut throwaway_count = 0usize;

        let mut current: Option<SsInstr> = None;
        let mut macro_op_index = 0usize;
        let mut last_created: Option<ScOp> = None;

        'decode: for decode_cycle in 0..RANDOMX_SUPERSCALAR_LATENCY {
            if ports_saturated || program.len() >= SUPERSCALAR_MAX_SIZE {
                break;
            }
            let decoder = fetch_next_decoder(last_created, decode_cycle, mul_count, gen);
            let slots = decoder.slots();
            let mut buffer_index = 0;

            while buffer_index < slots.len() {
                let top_cycle = cycle;

                let need_new = match current {
                    Some(ref ins) => macro_op_index >= template(ins.op).mops.len(),
                    None => true,
                };
                if need_new {
                    if ports_saturated || program.len() >= SUPERSCALAR_MAX_SIZE {
                        break 'decode;
                    }
                    let ins = create_for_slot(
                        gen,
                        slots[buffer_index],
                        decoder,
                        buffer_index + 1 == slots.len(),
                    );
                    last_created = Some(ins.op);
                    current = Some(ins);
                    macro_op_index = 0;
                }
                let ins = current.as_mut().unwrap();
                let tpl = template(ins.op);
                let mop = &tpl.mops[macro_op_index];

                let probed = schedule_mop(mop, &mut port_busy, cycle, dep_cycle, false);
                let mut schedule_cycle = match probed {
                    Some(c) => c,
                    None => {
                        ports_saturated = true;
                        break;
                    }
                };

                if macro_op_index as i32 == tpl.src_op {
                    let mut forward = 0;
                    while forward < LOOK_FORWARD_CYCLES
                        && !select_source(ins, schedule_cycle, &regs, gen)
                    {
                        schedule_cycle += 1;
                        cycle += 1;
                        forward += 1;
                    }
                    if forward == LOOK_FORWARD_CYCLES {
                        if throwaway_count < MAX_THROWAWAY_COUNT {
                            throwaway_count += 1;
                            macro_op_index = tpl.mops.len();
                            continue;
                        }
                        // No source register after the full throwaway budget;
                        // the program ends here.
                        break 'decode;
                    }
                }

                if macro_op_index as i32 == tpl.dst_op {
                    let mut forward = 0;
                    while forward < LOOK_FORWARD_CYCLES
                        && !select_destination(ins, schedule_cycle, throwaway_count > 0, &regs, gen)
                    {
                        schedule_cycle += 1;
                        cycle += 1;
                        forward += 1;
                    }
                    if forward == LOOK_FORWARD_CYCLES {
                        if throwaway_count < MAX_THROWAWAY_COUNT {
                            throwaway_count += 1;
                            macro_op_index = tpl.mops.len();
                            continue;
                        }
                        break 'decode;
                    }
                }
                throwaway_count = 0;

                // Operand stalls may have advanced the issue point; commit at
                // the adjusted cycle.
                let committed = schedule_mop(mop, &mut port_busy, schedule_cycle, schedule_cycle, true);
                let schedule_cycle = match committed {
                    Some(c) => c,
                    None => {
                        ports_saturated = true;
                        break;
                    }
                };
                dep_cycle = schedule_cycle + mop.latency;

                if macro_op_index as i32 == tpl.result_op {
                    let dst = ins.dst as usize;
                    regs[dst].latency = dep_cycle;
                    regs[dst].last_op_group = Some(ins.op_group);
                    regs[dst].last_op_par = ins.op_group_par;
                }

                buffer_index += 1;
                macro_op_index += 1;
                if schedule_cycle >= RANDOMX_SUPERSCALAR_LATENCY {
                    ports_saturated = true;
                }
                cycle = top_cycle;

                if macro_op_index >= tpl.mops.len() {
                    let mut done = current.take().unwrap();
                    if done.src < 0 {
                        done.src = done.dst;
                    }
                    if matches!(done.op, ScOp::IMulR | ScOp::IMulhR | ScOp::ISmulhR | ScOp::IMulRcp)
                    {
                        mul_count += 1;
                    }
                    program.push(ScInstr {
                        op: done.op,
                        dst: done.dst as usize,
                        src: done.src as usize,
                        mod_: done.mod_,
                        imm: match done.op {
                            ScOp::IAddC7 | ScOp::IAddC8 | ScOp::IAddC9 | ScOp::IXorC7
                            | ScOp::IXorC8 | ScOp::IXorC9 => sign_extend_2s_compl(done.imm32),
                            ScOp::IMulRcp => randomx_reciprocal(done.imm32 as u64),
                            _ => done.imm32 as u64,
                        },
                    });
                }
            }
            cycle += 1;
        }

        // The register with the longest dependency chain addresses the next
        // cache block during dataset derivation.
        let mut asic_latency = [0usize; 8];
        for ins in &program {
            let last_dst = asic_latency[ins.dst] + 1;
            let last_src = if ins.dst != ins.src { asic_latency[ins.src] + 1 } else { 0 };
            asic_latency[ins.dst] = last_dst.max(last_src);
        }
        let mut address_reg = 0;
        let mut max_latency = 0;
        for (i, &lat) in asic_latency.iter().enumerate() {
            if lat > max_latency {
                max_latency = lat;
                address_reg = i;
            }
        }

        debug!(
            "superscalar program: {} instructions, address register r{}",
            program.len(),
            address_reg
        );

        ScProgram { instructions: program, address_reg }
    }

    pub fn execute(&self, r: &mut [u64; 8]) {
        for ins in &self.instructions {
            match ins.op {
                ScOp::ISubR => r[ins.dst] = r[ins.dst].wrapping_sub(r[ins.src]),
                ScOp::IXorR => r[ins.dst] ^= r[ins.src],
                ScOp::IAddRs => {
                    r[ins.dst] = r[ins.dst].wrapping_add(r[ins.src] << ((ins.mod_ >> 2) & 3))
                }
                ScOp::IMulR => r[ins.dst] = r[ins.dst].wrapping_mul(r[ins.src]),
                ScOp::IRorC => r[ins.dst] = r[ins.dst].rotate_right(ins.imm as u32),
                ScOp::IAddC7 | ScOp::IAddC8 | ScOp::IAddC9 => {
                    r[ins.dst] = r[ins.dst].wrapping_add(ins.imm)
                }
                ScOp::IXorC7 | ScOp::IXorC8 | ScOp::IXorC9 => r[ins.dst] ^= ins.imm,
                ScOp::IMulhR => r[ins.dst] = mulh(r[ins.dst], r[ins.src]),
                ScOp::ISmulhR => r[ins.dst] = smulh(r[ins.dst] as i64, r[ins.src] as i64) as u64,
                ScOp::IMulRcp => r[ins.dst] = r[ins.dst].wrapping_mul(ins.imm),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use blake2b_simd::blake2b;

    #[test]
    fn generator_hashes_its_seed_buffer() {
        // 60 key bytes, zero padding, little-endian nonce at offset 60; the
        // first draw returns the hash of that buffer.
        let key = b"generator key";
        let mut expected = [0u8; 64];
        expected[..key.len()].copy_from_slice(key);
        expected[60..].copy_from_slice(&7u32.to_le_bytes());
        let hashed = blake2b(&expected);

        let mut gen = Blake2Generator::new(key, 7);
        assert_eq!(gen.get_byte(), hashed.as_bytes()[0]);
        assert_eq!(
            gen.get_u32(),
            u32::from_le_bytes(hashed.as_bytes()[1..5].try_into().unwrap())
        );
    }

    #[test]
    fn generator_truncates_long_keys() {
        let long = [0x5au8; 80];
        let mut a = Blake2Generator::new(&long, 0);
        let mut b = Blake2Generator::new(&long[..60], 0);
        for _ in 0..100 {
            assert_eq!(a.get_byte(), b.get_byte());
        }
    }

    #[test]
    fn programs_are_deterministic() {
        let mut g1 = Blake2Generator::new(b"test key 000", 0);
        let mut g2 = Blake2Generator::new(b"test key 000", 0);
        for _ in 0..8 {
            let p1 = ScProgram::generate(&mut g1);
            let p2 = ScProgram::generate(&mut g2);
            assert_eq!(p1.instructions, p2.instructions);
            assert_eq!(p1.address_reg, p2.address_reg);
        }
    }

    #[test]
    fn program_shape_is_sane() {
        let mut gen = Blake2Generator::new(b"shape", 0);
        for _ in 0..4 {
            let prog = ScProgram::generate(&mut gen);
            assert!(prog.instructions.len() <= SUPERSCALAR_MAX_SIZE);
            assert!(prog.instructions.len() > 64, "suspiciously short program");
            assert!(prog.address_reg < 8);
            // The decoder pressure guarantees a healthy share of multiplies.
            let muls = prog
                .instructions
                .iter()
                .filter(|i| {
                    matches!(i.op, ScOp::IMulR | ScOp::IMulhR | ScOp::ISmulhR | ScOp::IMulRcp)
                })
                .count();
            assert!(muls * 5 >= prog.instructions.len(), "not enough multiplies");
            for ins in &prog.instructions {
                assert!(ins.dst < 8 && ins.src < 8);
                if ins.op == ScOp::IRorC {
                    assert!(ins.imm > 0 && ins.imm < 64);
                }
                if ins.op == ScOp::IAddRs {
                    assert_ne!(ins.dst, REGISTER_NEEDS_DISPLACEMENT);
                }
            }
        }
    }

    #[test]
    fn simulated_latency_stays_bounded() {
        let mut gen = Blake2Generator::new(b"latency bound", 0);
        for _ in 0..6 {
            let prog = ScProgram::generate(&mut gen);
            let mut lat = [0usize; 8];
            for ins in &prog.instructions {
                let dst = lat[ins.dst] + 1;
                let src = if ins.dst != ins.src { lat[ins.src] + 1 } else { 0 };
                lat[ins.dst] = dst.max(src);
            }
            for &l in &lat {
                assert!(l <= RANDOMX_SUPERSCALAR_LATENCY + 3, "latency {} out of bounds", l);
            }
        }
    }

    #[test]
    fn executor_applies_operations() {
        let prog = ScProgram {
            instructions: vec![
                ScInstr { op: ScOp::IAddC7, dst: 0, src: 0, mod_: 0, imm: 5 },
                ScInstr { op: ScOp::IMulR, dst: 0, src: 1, mod_: 0, imm: 0 },
                ScInstr { op: ScOp::IRorC, dst: 0, src: 0, mod_: 0, imm: 8 },
                ScInstr { op: ScOp::IXorR, dst: 2, src: 0, mod_: 0, imm: 0 },
            ],
            address_reg: 0,
        };
        let mut r = [1u64, 3, 0xff, 0, 0, 0, 0, 0];
        prog.execute(&mut r);
        // ((1 + 5) * 3) ror 8 = 18 ror 8
        assert_eq!(r[0], 18u64.rotate_right(8));
        assert_eq!(r[2], 0xff ^ r[0]);
    }

    #[test]
    fn reciprocal_multiply_is_precomputed() {
        let mut gen = Blake2Generator::new(b"rcp", 0);
        let prog = ScProgram::generate(&mut gen);
        for ins in prog.instructions.iter().filter(|i| i.op == ScOp::IMulRcp) {
            // Reciprocals always have the top bit set.
            assert!(ins.imm >= 1 << 63);
        }
    }
}

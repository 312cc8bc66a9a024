//! IEEE-754 binary64 arithmetic with an explicit rounding mode.
//!
//! The VM must honor all four rounding modes selected by CFROUND, and native
//! Rust float arithmetic always rounds to nearest-even. All rounding-sensitive
//! operations therefore go through this module, which works directly on bit
//! patterns with guard/round/sticky rounding. The rounding mode is plain value
//! state; nothing here touches any CPU control register.

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const EXP_MASK: u64 = 0x7ff0_0000_0000_0000;
const MANT_MASK: u64 = 0x000f_ffff_ffff_ffff;
const IMPLICIT_BIT: u64 = 1u64 << 52;
const QUIET_NAN: u64 = 0x7ff8_0000_0000_0000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoundingMode {
    NearestEven,
    TowardNegative,
    TowardPositive,
    TowardZero,
}

impl RoundingMode {
    /// CFROUND encoding: 0 = nearest-even, 1 = toward -inf, 2 = toward +inf,
    /// 3 = toward zero.
    pub fn from_bits(bits: u64) -> RoundingMode {
        match bits & 3 {
            0 => RoundingMode::NearestEven,
            1 => RoundingMode::TowardNegative,
            2 => RoundingMode::TowardPositive,
            _ => RoundingMode::TowardZero,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SoftFloat {
    bits: u64,
}

fn exp_field(bits: u64) -> u64 {
    (bits & EXP_MASK) >> 52
}

fn is_nan(bits: u64) -> bool {
    exp_field(bits) == 0x7ff && bits & MANT_MASK != 0
}

fn is_inf(bits: u64) -> bool {
    exp_field(bits) == 0x7ff && bits & MANT_MASK == 0
}

fn is_zero(bits: u64) -> bool {
    bits & !SIGN_BIT == 0
}

/// Splits a nonzero finite value into (exponent, 53-bit significand).
/// Subnormals are normalized so the significand always has bit 52 set; the
/// returned exponent can then be zero or negative.
fn normalize(bits: u64) -> (i32, u64) {
    let e = exp_field(bits) as i32;
    let m = bits & MANT_MASK;
    if e == 0 {
        let shift = m.leading_zeros() - 11;
        (1 - shift as i32, m << shift)
    } else {
        (e, m | IMPLICIT_BIT)
    }
}

fn round_up(rm: RoundingMode, sign: u64, round_bits: u64, lsb_odd: bool) -> bool {
    if round_bits == 0 {
        return false;
    }
    match rm {
        RoundingMode::NearestEven => round_bits > 4 || (round_bits == 4 && lsb_odd),
        RoundingMode::TowardZero => false,
        RoundingMode::TowardPositive => sign == 0,
        RoundingMode::TowardNegative => sign != 0,
    }
}

fn overflow(sign: u64, rm: RoundingMode) -> SoftFloat {
    let inf = sign << 63 | EXP_MASK;
    let max_finite = sign << 63 | (0x7fe << 52) | MANT_MASK;
    let bits = match rm {
        RoundingMode::NearestEven => inf,
        RoundingMode::TowardZero => max_finite,
        RoundingMode::TowardPositive => {
            if sign == 0 {
                inf
            } else {
                max_finite
            }
        }
        RoundingMode::TowardNegative => {
            if sign != 0 {
                inf
            } else {
                max_finite
            }
        }
    };
    SoftFloat { bits }
}

/// Rounds and encodes a result. `sig` carries the 53-bit significand in bits
/// 55..3 with guard/round/sticky in bits 2..0; for normal results it lies in
/// [2^55, 2^56). `exp` <= 0 denormalizes first, folding shifted-out bits into
/// the sticky bit.
fn round_pack(sign: u64, mut exp: i32, mut sig: u64, rm: RoundingMode) -> SoftFloat {
    if exp >= 0x7ff {
        return overflow(sign, rm);
    }
    if exp <= 0 {
        let shift = (1 - exp) as u32;
        sig = if shift >= 64 {
            (sig != 0) as u64
        } else {
            (sig >> shift) | ((sig & ((1u64 << shift) - 1) != 0) as u64)
        };
        exp = 1;
    }
    let round_bits = sig & 7;
    let mut mant = sig >> 3;
    if round_up(rm, sign, round_bits, mant & 1 == 1) {
        mant += 1;
    }
    if mant >= 1 << 53 {
        mant >>= 1;
        exp += 1;
        if exp >= 0x7ff {
            return overflow(sign, rm);
        }
    }
    if mant < IMPLICIT_BIT {
        // Subnormal (exp is pinned to 1 here) or zero; the encoding falls out
        // of the bare mantissa. A round-up to exactly 2^52 lands on the
        // minimum normal with a zero mantissa field, which is the same bits.
        return SoftFloat { bits: sign << 63 | mant };
    }
    SoftFloat {
        bits: sign << 63 | (exp as u64) << 52 | (mant & MANT_MASK),
    }
}

impl SoftFloat {
    pub fn from_bits(bits: u64) -> SoftFloat {
        SoftFloat { bits }
    }

    pub fn to_bits(self) -> u64 {
        self.bits
    }

    fn neg(self) -> SoftFloat {
        SoftFloat { bits: self.bits ^ SIGN_BIT }
    }

    pub fn add(self, other: SoftFloat, rm: RoundingMode) -> SoftFloat {
        let (a, b) = (self.bits, other.bits);
        if is_nan(a) || is_nan(b) {
            return SoftFloat { bits: QUIET_NAN };
        }
        if is_inf(a) {
            if is_inf(b) && (a ^ b) >> 63 != 0 {
                return SoftFloat { bits: QUIET_NAN };
            }
            return self;
        }
        if is_inf(b) {
            return other;
        }
        if is_zero(b) {
            if is_zero(a) {
                if a == b {
                    return self;
                }
                // (+0) + (-0): positive zero except toward negative infinity.
                let bits = if rm == RoundingMode::TowardNegative { SIGN_BIT } else { 0 };
                return SoftFloat { bits };
            }
            return self;
        }
        if is_zero(a) {
            return other;
        }

        let (big, small) = if a & !SIGN_BIT >= b & !SIGN_BIT { (a, b) } else { (b, a) };
        let sign = big >> 63;
        let subtract = (a ^ b) >> 63 != 0;

        let (be, bm) = {
            let e = exp_field(big) as i32;
            if e == 0 { (1, big & MANT_MASK) } else { (e, big & MANT_MASK | IMPLICIT_BIT) }
        };
        let (se, sm) = {
            let e = exp_field(small) as i32;
            if e == 0 { (1, small & MANT_MASK) } else { (e, small & MANT_MASK | IMPLICIT_BIT) }
        };

        let shift = (be - se) as u32;
        let big3 = bm << 3;
        let small3 = sm << 3;
        let aligned = if shift == 0 {
            small3
        } else if shift < 64 {
            (small3 >> shift) | ((small3 & ((1u64 << shift) - 1) != 0) as u64)
        } else {
            1
        };

        let mut exp = be;
        let mut sig = if subtract {
            let diff = big3 - aligned;
            if diff == 0 {
                // Exact cancellation: positive zero except toward -inf.
                let bits = if rm == RoundingMode::TowardNegative { SIGN_BIT } else { 0 };
                return SoftFloat { bits };
            }
            diff
        } else {
            big3 + aligned
        };

        if sig >= 1 << 56 {
            sig = (sig >> 1) | (sig & 1);
            exp += 1;
        }
        while sig < 1 << 55 && exp > 1 {
            sig <<= 1;
            exp -= 1;
        }
        round_pack(sign, exp, sig, rm)
    }

    pub fn sub(self, other: SoftFloat, rm: RoundingMode) -> SoftFloat {
        self.add(other.neg(), rm)
    }

    pub fn mul(self, other: SoftFloat, rm: RoundingMode) -> SoftFloat {
        let (a, b) = (self.bits, other.bits);
        let sign = (a ^ b) >> 63;
        if is_nan(a) || is_nan(b) {
            return SoftFloat { bits: QUIET_NAN };
        }
        if is_inf(a) || is_inf(b) {
            if is_zero(a) || is_zero(b) {
                return SoftFloat { bits: QUIET_NAN };
            }
            return SoftFloat { bits: sign << 63 | EXP_MASK };
        }
        if is_zero(a) || is_zero(b) {
            return SoftFloat { bits: sign << 63 };
        }

        let (ea, ma) = normalize(a);
        let (eb, mb) = normalize(b);
        let product = ma as u128 * mb as u128;
        let (sig, exp) = if product >= 1 << 105 {
            let sticky = product & ((1 << 50) - 1) != 0;
            ((product >> 50) as u64 | sticky as u64, ea + eb - 1022)
        } else {
            let sticky = product & ((1 << 49) - 1) != 0;
            ((product >> 49) as u64 | sticky as u64, ea + eb - 1023)
        };
        round_pack(sign, exp, sig, rm)
    }

    pub fn div(self, other: SoftFloat, rm: RoundingMode) -> SoftFloat {
        let (a, b) = (self.bits, other.bits);
        let sign = (a ^ b) >> 63;
        if is_nan(a) || is_nan(b) {
            return SoftFloat { bits: QUIET_NAN };
        }
        if is_inf(a) {
            if is_inf(b) {
                return SoftFloat { bits: QUIET_NAN };
            }
            return SoftFloat { bits: sign << 63 | EXP_MASK };
        }
        if is_inf(b) {
            return SoftFloat { bits: sign << 63 };
        }
        if is_zero(b) {
            if is_zero(a) {
                return SoftFloat { bits: QUIET_NAN };
            }
            return SoftFloat { bits: sign << 63 | EXP_MASK };
        }
        if is_zero(a) {
            return SoftFloat { bits: sign << 63 };
        }

        let (ea, ma) = normalize(a);
        let (eb, mb) = normalize(b);
        // Pre-scale so the quotient always lands in [2^55, 2^56): 53 result
        // bits plus guard and round, with the remainder as sticky.
        let (num_shift, exp) = if ma >= mb {
            (55, ea - eb + 1023)
        } else {
            (56, ea - eb + 1022)
        };
        let num = (ma as u128) << num_shift;
        let q = (num / mb as u128) as u64;
        let r = num % mb as u128;
        let sig = q | (r != 0) as u64;
        round_pack(sign, exp, sig, rm)
    }

    pub fn sqrt(self, rm: RoundingMode) -> SoftFloat {
        let a = self.bits;
        if is_nan(a) {
            return SoftFloat { bits: QUIET_NAN };
        }
        if is_zero(a) {
            return self;
        }
        if a & SIGN_BIT != 0 {
            return SoftFloat { bits: QUIET_NAN };
        }
        if is_inf(a) {
            return self;
        }

        let (e, m) = normalize(a);
        let eu = e - 1023;
        // Shift the radicand so its integer square root always has 54 bits
        // (53 result bits plus guard); the shift parity keeps the halved
        // exponent integral. A guard-1 sticky-0 tie is impossible: an odd
        // 54-bit root squared is odd, while the radicand is even.
        let k = if eu & 1 == 0 { 54 } else { 55 };
        let radicand = (m as u128) << k;
        let s = isqrt(radicand);
        let r = radicand - s * s;
        let sig = (s as u64) << 2 | (r != 0) as u64;
        let exp = 1076 + (eu - 52 - k) / 2;
        round_pack(0, exp, sig, rm)
    }
}

fn isqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut rem = n;
    let mut root = 0u128;
    let mut bit = 1u128 << ((127 - n.leading_zeros()) & !1);
    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}

#[cfg(test)]
mod test {
    use super::*;

    // Native f64 arithmetic is correctly rounded to nearest-even, which makes
    // it an exact oracle for that mode.
    #[test]
    fn nearest_even_matches_native() {
        let mut values = vec![
            0x0000000000000000u64, // +0
            0x8000000000000000,    // -0
            0x3ff0000000000000,    // 1.0
            0xbff0000000000000,    // -1.0
            0x3fd5555555555555,    // ~1/3
            0x4008000000000000,    // 3.0
            0x3f88f6d9e5682a07,
            0x4095900000000000, // 1380.0
            0x0010000000000000, // min normal
            0x000fffffffffffff, // max subnormal
            0x0000000000000001, // min subnormal
            0x7fe1234567abcdef, // huge
            0x41dfffffffffffff,
            0x3e45798ee2308c3a,
            0xc1e0000000000000,
        ];
        // Deterministic xorshift to widen coverage.
        let mut x = 0x9e3779b97f4a7c15u64;
        for _ in 0..500 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            values.push(x);
        }

        let rm = RoundingMode::NearestEven;
        for &xa in &values {
            for &xb in &values {
                let (fa, fb) = (f64::from_bits(xa), f64::from_bits(xb));
                check(SoftFloat::from_bits(xa).add(SoftFloat::from_bits(xb), rm), fa + fb);
                check(SoftFloat::from_bits(xa).sub(SoftFloat::from_bits(xb), rm), fa - fb);
                check(SoftFloat::from_bits(xa).mul(SoftFloat::from_bits(xb), rm), fa * fb);
                check(SoftFloat::from_bits(xa).div(SoftFloat::from_bits(xb), rm), fa / fb);
            }
            let fa = f64::from_bits(xa);
            if fa >= 0.0 {
                check(SoftFloat::from_bits(xa).sqrt(rm), fa.sqrt());
            }
        }
    }

    fn check(got: SoftFloat, want: f64) {
        if want.is_nan() {
            assert!(is_nan(got.to_bits()), "expected NaN, got {:#x}", got.to_bits());
        } else {
            assert_eq!(
                got.to_bits(),
                want.to_bits(),
                "got {:#x} want {:#x}",
                got.to_bits(),
                want.to_bits()
            );
        }
    }

    #[test]
    fn directed_modes_bracket_nearest() {
        let mut values = Vec::new();
        let mut x = 0x2545f4914f6cdd1du64;
        for _ in 0..200 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            values.push(x);
        }
        for &xa in &values {
            for &xb in &values[..32] {
                let a = SoftFloat::from_bits(xa);
                let b = SoftFloat::from_bits(xb);
                for op in 0..4 {
                    let apply = |rm| match op {
                        0 => a.add(b, rm),
                        1 => a.sub(b, rm),
                        2 => a.mul(b, rm),
                        _ => a.div(b, rm),
                    };
                    let down = apply(RoundingMode::TowardNegative);
                    let near = apply(RoundingMode::NearestEven);
                    let up = apply(RoundingMode::TowardPositive);
                    let (fd, fn_, fu) = (
                        f64::from_bits(down.to_bits()),
                        f64::from_bits(near.to_bits()),
                        f64::from_bits(up.to_bits()),
                    );
                    if fd.is_nan() || fn_.is_nan() || fu.is_nan() {
                        continue;
                    }
                    assert!(fd <= fn_ && fn_ <= fu, "{:#x} op{} {:#x}", xa, op, xb);
                }
            }
        }
    }

    #[test]
    fn directed_mode_exact_cases() {
        let one = SoftFloat::from_bits(0x3ff0000000000000);
        let tiny = SoftFloat::from_bits((1023u64 - 53) << 52); // 2^-53
        // 1 + 2^-53 is an exact tie.
        assert_eq!(one.add(tiny, RoundingMode::NearestEven).to_bits(), 0x3ff0000000000000);
        assert_eq!(one.add(tiny, RoundingMode::TowardZero).to_bits(), 0x3ff0000000000000);
        assert_eq!(one.add(tiny, RoundingMode::TowardNegative).to_bits(), 0x3ff0000000000000);
        assert_eq!(one.add(tiny, RoundingMode::TowardPositive).to_bits(), 0x3ff0000000000001);

        // -(1 + 2^-53): mirrored behavior.
        let neg_one = one.neg();
        assert_eq!(neg_one.sub(tiny, RoundingMode::TowardPositive).to_bits(), 0xbff0000000000000);
        assert_eq!(neg_one.sub(tiny, RoundingMode::TowardNegative).to_bits(), 0xbff0000000000001);

        // Exact cancellation: +0 everywhere except toward -inf.
        assert_eq!(one.sub(one, RoundingMode::NearestEven).to_bits(), 0);
        assert_eq!(one.sub(one, RoundingMode::TowardZero).to_bits(), 0);
        assert_eq!(one.sub(one, RoundingMode::TowardPositive).to_bits(), 0);
        assert_eq!(one.sub(one, RoundingMode::TowardNegative).to_bits(), SIGN_BIT);

        // Exact operations are mode-independent.
        let four = SoftFloat::from_bits(0x4010000000000000);
        let two = SoftFloat::from_bits(0x4000000000000000);
        for rm in [
            RoundingMode::NearestEven,
            RoundingMode::TowardNegative,
            RoundingMode::TowardPositive,
            RoundingMode::TowardZero,
        ] {
            assert_eq!(four.sqrt(rm).to_bits(), two.to_bits());
            assert_eq!(one.div(two, rm).to_bits(), 0x3fe0000000000000);
        }

        // 1/3 rounds down toward zero/-inf and up toward +inf.
        let three = SoftFloat::from_bits(0x4008000000000000);
        let down = one.div(three, RoundingMode::TowardNegative).to_bits();
        let up = one.div(three, RoundingMode::TowardPositive).to_bits();
        assert_eq!(up, down + 1);
        assert_eq!(one.div(three, RoundingMode::TowardZero).to_bits(), down);
    }

    #[test]
    fn cfround_encoding() {
        assert_eq!(RoundingMode::from_bits(0), RoundingMode::NearestEven);
        assert_eq!(RoundingMode::from_bits(1), RoundingMode::TowardNegative);
        assert_eq!(RoundingMode::from_bits(2), RoundingMode::TowardPositive);
        assert_eq!(RoundingMode::from_bits(3), RoundingMode::TowardZero);
        assert_eq!(RoundingMode::from_bits(7), RoundingMode::TowardZero);
    }
}

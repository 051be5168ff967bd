//! SIMD-accelerated f32 kernels.
//!
//! NEON (aarch64) and AVX2+FMA (x86_64) implementations of the two primitive kernels
//! every metric is built from. Falls back to scalar loops on other targets or when AVX2
//! is unavailable at runtime.

/// Sum of squared differences between two equal-length f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_l2_sq(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_l2_sq(a, b) };
        }
    }
    scalar_l2_sq(a, b)
}

/// Dot product of two equal-length f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_inner_product(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_inner_product(a, b) };
        }
    }
    scalar_inner_product(a, b)
}

fn scalar_l2_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn scalar_inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ---- NEON (aarch64) ----

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

#[cfg(target_arch = "aarch64")]
unsafe fn neon_l2_sq(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let (pa, pb) = (a.as_ptr(), b.as_ptr());
    let mut acc = [vdupq_n_f32(0.0); 4];

    let blocks = len / 16;
    for blk in 0..blocks {
        let base = blk * 16;
        for (lane, s) in acc.iter_mut().enumerate() {
            let off = base + lane * 4;
            let d = vsubq_f32(vld1q_f32(pa.add(off)), vld1q_f32(pb.add(off)));
            *s = vfmaq_f32(*s, d, d);
        }
    }

    let mut sum = vaddvq_f32(vaddq_f32(vaddq_f32(acc[0], acc[1]), vaddq_f32(acc[2], acc[3])));
    for i in (blocks * 16)..len {
        let d = *pa.add(i) - *pb.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "aarch64")]
unsafe fn neon_inner_product(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let (pa, pb) = (a.as_ptr(), b.as_ptr());
    let mut acc = [vdupq_n_f32(0.0); 4];

    let blocks = len / 16;
    for blk in 0..blocks {
        let base = blk * 16;
        for (lane, s) in acc.iter_mut().enumerate() {
            let off = base + lane * 4;
            *s = vfmaq_f32(*s, vld1q_f32(pa.add(off)), vld1q_f32(pb.add(off)));
        }
    }

    let mut sum = vaddvq_f32(vaddq_f32(vaddq_f32(acc[0], acc[1]), vaddq_f32(acc[2], acc[3])));
    for i in (blocks * 16)..len {
        sum += *pa.add(i) * *pb.add(i);
    }
    sum
}

// ---- AVX2+FMA (x86_64) ----

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Horizontal sum of the 8 lanes of a __m256.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum256(v: __m256) -> f32 {
    let quad = _mm_add_ps(_mm256_castps256_ps128(v), _mm256_extractf128_ps(v, 1));
    let pair = _mm_add_ps(quad, _mm_movehl_ps(quad, quad));
    _mm_cvtss_f32(_mm_add_ss(pair, _mm_shuffle_ps(pair, pair, 0x55)))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_l2_sq(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let (pa, pb) = (a.as_ptr(), b.as_ptr());
    let mut lo = _mm256_setzero_ps();
    let mut hi = _mm256_setzero_ps();

    let blocks = len / 16;
    for blk in 0..blocks {
        let base = blk * 16;
        let d0 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(base)), _mm256_loadu_ps(pb.add(base)));
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(pa.add(base + 8)),
            _mm256_loadu_ps(pb.add(base + 8)),
        );
        lo = _mm256_fmadd_ps(d0, d0, lo);
        hi = _mm256_fmadd_ps(d1, d1, hi);
    }

    let mut sum = hsum256(_mm256_add_ps(lo, hi));
    for i in (blocks * 16)..len {
        let d = *pa.add(i) - *pb.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_inner_product(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let (pa, pb) = (a.as_ptr(), b.as_ptr());
    let mut lo = _mm256_setzero_ps();
    let mut hi = _mm256_setzero_ps();

    let blocks = len / 16;
    for blk in 0..blocks {
        let base = blk * 16;
        lo = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(base)), _mm256_loadu_ps(pb.add(base)), lo);
        hi = _mm256_fmadd_ps(
            _mm256_loadu_ps(pa.add(base + 8)),
            _mm256_loadu_ps(pb.add(base + 8)),
            hi,
        );
    }

    let mut sum = hsum256(_mm256_add_ps(lo, hi));
    for i in (blocks * 16)..len {
        sum += *pa.add(i) * *pb.add(i);
    }
    sum
}

//! Distance metrics.
//!
//! Internally every backend ranks by a *distance* where **lower is better**: squared L2
//! for [`MetricType::L2`], the negated dot product for [`MetricType::InnerProduct`], and
//! the plain distance for the Minkowski family (`L1`, `Linf`, `Lp`). Search results
//! report the metric's natural value instead (dot product descending, everything else
//! ascending); [`MetricType::report`] converts between the two.

/// SIMD f32 kernels with scalar fallback.
pub mod simd;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Similarity metric an index is built for. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum MetricType {
    /// Dot product, larger is more similar.
    InnerProduct,
    /// Squared Euclidean distance, smaller is more similar.
    #[default]
    L2,
    /// Sum of absolute differences.
    L1,
    /// Largest absolute difference.
    Linf,
    /// `sum |a_i - b_i|^p`, without the final root. `p` is the metric argument.
    Lp(f32),
}

impl MetricType {
    /// Stable numeric code (`InnerProduct = 0`, `L2 = 1`, `L1 = 2`, `Linf = 3`, `Lp = 4`).
    pub fn code(self) -> u32 {
        match self {
            MetricType::InnerProduct => 0,
            MetricType::L2 => 1,
            MetricType::L1 => 2,
            MetricType::Linf => 3,
            MetricType::Lp(_) => 4,
        }
    }

    /// Parameter persisted next to the code. `p` for `Lp`, `0.0` otherwise.
    pub fn arg(self) -> f32 {
        match self {
            MetricType::Lp(p) => p,
            _ => 0.0,
        }
    }

    /// Inverse of [`code`](Self::code) + [`arg`](Self::arg). The argument is ignored
    /// except for `Lp`, where it must be a valid exponent.
    pub fn from_code(code: u32, arg: f32) -> Result<Self> {
        let metric = match code {
            0 => MetricType::InnerProduct,
            1 => MetricType::L2,
            2 => MetricType::L1,
            3 => MetricType::Linf,
            4 => MetricType::Lp(arg),
            other => return Err(IndexError::argument(format!("unknown metric code {other}"))),
        };
        metric.validate()?;
        Ok(metric)
    }

    /// Reject an `Lp` exponent that is not a finite positive number.
    pub fn validate(self) -> Result<()> {
        match self {
            MetricType::Lp(p) if !(p.is_finite() && p > 0.0) => Err(IndexError::argument(
                format!("Lp metric needs a finite exponent > 0, got {p}"),
            )),
            _ => Ok(()),
        }
    }

    /// Ranking distance between two vectors. Lower is better for every metric.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::L2 => simd::l2_sq(a, b),
            MetricType::InnerProduct => -simd::inner_product(a, b),
            MetricType::L1 => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            MetricType::Linf => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f32::max),
            MetricType::Lp(p) => a.iter().zip(b).map(|(x, y)| (x - y).abs().powf(p)).sum(),
        }
    }

    /// Convert a ranking distance into the value reported in search results.
    #[inline]
    pub fn report(self, distance: f32) -> f32 {
        match self {
            MetricType::InnerProduct => -distance,
            _ => distance,
        }
    }

    /// Reported value of an empty result slot.
    pub fn worst(self) -> f32 {
        self.report(f32::INFINITY)
    }

    /// `true` when larger reported values are better.
    pub fn is_similarity(self) -> bool {
        matches!(self, MetricType::InnerProduct)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::InnerProduct => f.write_str("ip"),
            MetricType::L2 => f.write_str("l2"),
            MetricType::L1 => f.write_str("l1"),
            MetricType::Linf => f.write_str("linf"),
            MetricType::Lp(p) => write!(f, "lp:{p}"),
        }
    }
}

impl FromStr for MetricType {
    type Err = IndexError;

    /// Accepts `l2`, `ip`, `l1`, `linf` and `lp:<p>` (plus a few aliases).
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        if let Some(p) = lower.strip_prefix("lp:") {
            let p: f32 = p
                .parse()
                .map_err(|_| IndexError::argument(format!("bad Lp exponent '{p}'")))?;
            let metric = MetricType::Lp(p);
            metric.validate()?;
            return Ok(metric);
        }
        match lower.as_str() {
            "l2" | "euclidean" => Ok(MetricType::L2),
            "ip" | "inner_product" | "dot" => Ok(MetricType::InnerProduct),
            "l1" | "manhattan" => Ok(MetricType::L1),
            "linf" | "chebyshev" => Ok(MetricType::Linf),
            other => Err(IndexError::argument(format!("unknown metric '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_distance() {
        let d = MetricType::L2.distance(&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]);
        assert_eq!(d, 25.0);
        assert_eq!(MetricType::L2.report(d), 25.0);
    }

    #[test]
    fn test_inner_product_reports_dot() {
        let d = MetricType::InnerProduct.distance(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
        assert_eq!(d, -32.0);
        assert_eq!(MetricType::InnerProduct.report(d), 32.0);
    }

    #[test]
    fn test_minkowski_distances() {
        let a = [1.0, -2.0, 0.5];
        let b = [4.0, 2.0, 0.5];
        assert_eq!(MetricType::L1.distance(&a, &b), 7.0);
        assert_eq!(MetricType::Linf.distance(&a, &b), 4.0);
        assert!((MetricType::Lp(3.0).distance(&a, &b) - 91.0).abs() < 1e-3);
        assert!((MetricType::Lp(2.0).distance(&a, &b) - MetricType::L2.distance(&a, &b)).abs() < 1e-4);
        assert_eq!(MetricType::L1.report(7.0), 7.0);
    }

    #[test]
    fn test_worst_values() {
        assert_eq!(MetricType::L2.worst(), f32::INFINITY);
        assert_eq!(MetricType::Linf.worst(), f32::INFINITY);
        assert_eq!(MetricType::InnerProduct.worst(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_codes() {
        assert_eq!(MetricType::InnerProduct.code(), 0);
        assert_eq!(MetricType::L2.code(), 1);
        assert_eq!(MetricType::Lp(1.5).code(), 4);
        assert_eq!(MetricType::Lp(1.5).arg(), 1.5);
        assert_eq!(MetricType::L1.arg(), 0.0);
        assert_eq!(MetricType::from_code(1, 0.0).unwrap(), MetricType::L2);
        assert_eq!(MetricType::from_code(3, 9.0).unwrap(), MetricType::Linf);
        assert_eq!(MetricType::from_code(4, 3.0).unwrap(), MetricType::Lp(3.0));
        assert!(MetricType::from_code(7, 0.0).is_err());
        assert!(MetricType::from_code(4, 0.0).is_err());
        assert!(MetricType::from_code(4, f32::NAN).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("IP".parse::<MetricType>().unwrap(), MetricType::InnerProduct);
        assert_eq!("l2".parse::<MetricType>().unwrap(), MetricType::L2);
        assert_eq!("L1".parse::<MetricType>().unwrap(), MetricType::L1);
        assert_eq!("linf".parse::<MetricType>().unwrap(), MetricType::Linf);
        assert_eq!("lp:3".parse::<MetricType>().unwrap(), MetricType::Lp(3.0));
        assert!("lp:-1".parse::<MetricType>().is_err());
        assert!("lp:x".parse::<MetricType>().is_err());
        assert!("cosine".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for metric in [MetricType::L1, MetricType::Linf, MetricType::Lp(2.5), MetricType::InnerProduct] {
            assert_eq!(metric.to_string().parse::<MetricType>().unwrap(), metric);
        }
    }
}

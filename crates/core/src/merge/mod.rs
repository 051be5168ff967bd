//! Combining index states.
//!
//! [`merge_all`] unions several in-memory indexes into one. [`merge_on_disk`] is the
//! out-of-core variant for IVF: it streams postings list by list into an external data
//! file and writes an index that maps it.

mod ondisk;

pub use ondisk::{is_on_disk_supported, merge_on_disk, MergePart};

use crate::error::{IndexError, Result};
use crate::index::{check_same_shape, AnyIndex, VectorIndex};

/// Check that `other` could be merged into `target` without touching either.
pub fn check_mergeable(target: &AnyIndex, other: &AnyIndex) -> Result<()> {
    check_same_shape(target, other)?;
    if let (Some(a), Some(b)) = (target.as_ivf(), other.as_ivf()) {
        if a.nlist() != b.nlist() {
            return Err(IndexError::argument(format!(
                "cannot merge IVF indexes with nlist {} and {}",
                a.nlist(),
                b.nlist()
            )));
        }
        if !a.is_trained() && b.ntotal() > 0 {
            return Err(IndexError::NotTrained);
        }
    }
    Ok(())
}

/// Append every source to `target` in order. All sources are validated first, so an
/// error leaves `target` untouched.
pub fn merge_all(target: &mut AnyIndex, sources: &[&AnyIndex]) -> Result<()> {
    for source in sources {
        check_mergeable(target, source)?;
    }
    for source in sources {
        target.merge_from(source)?;
    }
    tracing::debug!(
        "Merged {} indexes into {} index ({} vectors)",
        sources.len(),
        target.kind(),
        target.ntotal()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::flat::FlatIndex;
    use crate::ivf::IvfIndex;
    use crate::metric::MetricType;

    fn flat(values: &[f32]) -> AnyIndex {
        let mut f = FlatIndex::new(2, MetricType::L2).unwrap();
        f.add(values).unwrap();
        f.into()
    }

    #[test]
    fn test_merge_all_appends_in_order() {
        let mut target = flat(&[0.0, 0.0]);
        let a = flat(&[1.0, 1.0]);
        let b = flat(&[2.0, 2.0, 3.0, 3.0]);
        merge_all(&mut target, &[&a, &b]).unwrap();
        assert_eq!(target.ntotal(), 4);
        assert_eq!(target.reconstruct(3).unwrap(), vec![3.0, 3.0]);
        assert_eq!(a.ntotal(), 1);
    }

    #[test]
    fn test_merge_all_is_all_or_nothing() {
        let mut target = flat(&[0.0, 0.0]);
        let ok = flat(&[1.0, 1.0]);
        let mut wrong = FlatIndex::new(3, MetricType::L2).unwrap();
        wrong.add(&[1.0, 2.0, 3.0]).unwrap();
        let wrong: AnyIndex = wrong.into();
        let err = merge_all(&mut target, &[&ok, &wrong]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        assert_eq!(target.ntotal(), 1);
    }

    #[test]
    fn test_ivf_nlist_mismatch() {
        let a: AnyIndex = IvfIndex::with_dimension(2, 2, MetricType::L2).unwrap().into();
        let b: AnyIndex = IvfIndex::with_dimension(2, 3, MetricType::L2).unwrap().into();
        assert_eq!(check_mergeable(&a, &b).unwrap_err().kind(), ErrorKind::Argument);
    }
}

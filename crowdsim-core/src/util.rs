use glam::IVec2;
use num_traits::PrimInt;

use crate::error::InvalidThreadCountWarning;

/// Index struct for [`ndarray::Array2`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Index {
    pub y: i32,
    pub x: i32,
}

impl Index {
    pub fn new<T: PrimInt>(x: T, y: T) -> Self {
        Index {
            x: x.to_i32().unwrap_or(i32::MAX),
            y: y.to_i32().unwrap_or(i32::MAX),
        }
    }
}

impl From<IVec2> for Index {
    fn from(cell: IVec2) -> Self {
        Index {
            x: cell.x,
            y: cell.y,
        }
    }
}

unsafe impl ndarray::NdIndex<ndarray::Ix2> for Index {
    fn index_checked(&self, dim: &ndarray::Ix2, strides: &ndarray::Ix2) -> Option<isize> {
        if self.x.is_negative() || self.y.is_negative() {
            None
        } else {
            (self.y as usize, self.x as usize).index_checked(dim, strides)
        }
    }

    fn index_unchecked(&self, strides: &ndarray::Ix2) -> isize {
        (self.y as usize, self.x as usize).index_unchecked(strides)
    }
}

/// Number of workers to use for a thread hint. Non-positive hints fall back
/// to the hardware thread count and produce a warning.
pub fn resolve_thread_count(requested: i32) -> (usize, Option<InvalidThreadCountWarning>) {
    if requested > 0 {
        return (requested as usize, None);
    }

    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let warning = InvalidThreadCountWarning {
        requested,
        fallback,
    };

    (fallback, Some(warning))
}

#[cfg(feature = "gpu")]
pub use self::ocl_conv::*;

#[cfg(feature = "gpu")]
mod ocl_conv {
    use glam::{IVec2, Vec2};
    use ocl::prm::{Float4, Int2};

    pub trait ToGlam {
        type T;
        fn to_glam(self) -> Self::T;
    }

    impl ToGlam for Int2 {
        type T = IVec2;
        fn to_glam(self) -> IVec2 {
            let array: [i32; 2] = self.into();
            IVec2::from(array)
        }
    }

    pub trait ToOcl {
        type T;
        fn to_ocl(self) -> Self::T;
    }

    impl ToOcl for IVec2 {
        type T = Int2;
        fn to_ocl(self) -> Int2 {
            Int2::from(self.to_array())
        }
    }

    /// Pack a circle as (x, y, radius, 0).
    pub fn circle_to_ocl(center: Vec2, radius: f32) -> Float4 {
        Float4::new(center.x, center.y, radius, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use glam::ivec2;
    use ndarray::array;

    use super::*;

    #[test]
    fn test_index_bounds() {
        let grid = array![[1, 2, 3], [4, 5, 6]];
        assert_eq!(grid.get(Index::new(2, 1)), Some(&6));
        assert_eq!(grid.get(Index::from(ivec2(0, 1))), Some(&4));
        assert_eq!(grid.get(Index::new(-1, 0)), None);
        assert_eq!(grid.get(Index::new(3, 0)), None);
        assert_eq!(grid.get(Index::new(1usize, 1)), Some(&5));
    }

    #[test]
    fn test_resolve_thread_count() {
        assert_eq!(resolve_thread_count(3), (3, None));

        let (n, warning) = resolve_thread_count(0);
        assert!(n >= 1);
        assert_eq!(warning.map(|w| w.fallback), Some(n));

        let (n, warning) = resolve_thread_count(-2);
        assert_eq!(
            warning,
            Some(InvalidThreadCountWarning {
                requested: -2,
                fallback: n
            })
        );
    }
}

//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to align the arena reservation to be a multiple of
/// [`crate::kernel::page_size`] and block sizes to be a multiple of
/// [`crate::config::ALIGNMENT`].
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is close to `usize::MAX`.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    Some(to_be_aligned.checked_add(aligment - 1)? & !(aligment - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ALIGNMENT;

    #[test]
    fn align_to_alignment_unit() {
        let aligments = vec![(1..17, 16), (17..33, 32), (33..49, 48), (49..65, 64)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, ALIGNMENT));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn checked_align_detects_overflow() {
        assert_eq!(checked_align(100, ALIGNMENT), Some(112));
        assert_eq!(checked_align(usize::MAX - 3, ALIGNMENT), None);
    }
}

//! Insertion sort for draw lists that barely change between frames.
//!
//! With last frame's order as input most elements are already in place,
//! so a pass is close to linear. Worst case (full reversal) is O(n²).

/// Index-addressed sequence: the three operations a sort needs.
pub trait Sequence {
    fn len(&self) -> usize;
    /// `true` if element `i` must come before element `j`.
    fn less(&self, i: usize, j: usize) -> bool;
    fn swap(&mut self, i: usize, j: usize);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Ord> Sequence for [T] {
    #[inline]
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    #[inline]
    fn less(&self, i: usize, j: usize) -> bool {
        self[i] < self[j]
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        <[T]>::swap(self, i, j)
    }
}

impl<T: Ord> Sequence for Vec<T> {
    #[inline]
    fn len(&self) -> usize {
        Vec::len(self)
    }

    #[inline]
    fn less(&self, i: usize, j: usize) -> bool {
        self[i] < self[j]
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        self.as_mut_slice().swap(i, j)
    }
}

/// Sort `data` in place and return the number of swaps performed.
pub fn insertion_sort<S: Sequence + ?Sized>(data: &mut S) -> usize {
    let mut swaps = 0;
    for i in 1..data.len() {
        let mut j = i;
        while j > 0 && data.less(j, j - 1) {
            data.swap(j, j - 1);
            swaps += 1;
            j -= 1;
        }
    }
    swaps
}

pub fn is_sorted<S: Sequence + ?Sized>(data: &S) -> bool {
    (1..data.len()).all(|i| !data.less(i, i - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_input_needs_no_swaps() {
        let mut v = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(insertion_sort(&mut v), 0);
        assert_eq!(v, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn one_adjacent_inversion_needs_one_swap() {
        let mut v = vec![1, 2, 4, 3, 5, 6];
        assert_eq!(insertion_sort(&mut v), 1);
        assert_eq!(v, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn reversed_input_is_quadratic() {
        let n = 10;
        let mut v: Vec<i32> = (0..n).rev().collect();
        assert_eq!(insertion_sort(&mut v), (n * (n - 1) / 2) as usize);
        assert!(is_sorted(&v));
    }

    #[test]
    fn works_on_slices() {
        let mut pairs = [(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd')];
        let data: &mut [(i32, char)] = &mut pairs;
        insertion_sort(data);
        assert_eq!(pairs, [(1, 'b'), (1, 'd'), (2, 'a'), (2, 'c')]);
    }

    #[test]
    fn empty_and_single_are_trivially_sorted() {
        let mut empty: Vec<u8> = Vec::new();
        assert_eq!(insertion_sort(&mut empty), 0);
        assert!(Sequence::is_empty(&empty));
        let mut one = vec![7];
        assert_eq!(insertion_sort(&mut one), 0);
    }
}

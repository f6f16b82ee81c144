//! k-subsets of `0..n` in lexicographic index order

/// Exact binomial coefficient `C(n, k)`; 0 when `k > n`.
pub fn n_choose_k(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 1..=k {
        // acc * (n - k + i) is always divisible by i here
        acc = acc * (n - k + i) as u128 / i as u128;
    }
    acc
}

/// Iterator over the `k`-element index subsets of `0..n`.
///
/// Subsets are yielded as ascending index slices in lexicographic order:
/// `[0,1,2], [0,1,3], ..., [n-3,n-2,n-1]`. `k == 0` yields one empty subset.
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    first: bool,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            first: true,
            done: k > n,
        }
    }

    /// Advance to the next subset and return it, or `None` when exhausted.
    /// The slice borrows the iterator state.
    pub fn next_subset(&mut self) -> Option<&[usize]> {
        if self.done {
            return None;
        }
        if self.first {
            self.first = false;
            return Some(&self.indices);
        }
        let k = self.indices.len();
        // rightmost position that can still move right
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                return None;
            }
            i -= 1;
            if self.indices[i] < self.n - k + i {
                break;
            }
        }
        self.indices[i] += 1;
        for j in i + 1..k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        Some(&self.indices)
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_subset().map(<[usize]>::to_vec)
    }
}

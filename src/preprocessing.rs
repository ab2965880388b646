//! Sequence shaping shared by the synthesis front end.

use ndarray::Array2;

/// Insert `filler` before, between and after every element.
///
/// `[a, b, c]` becomes `[f, a, f, b, f, c, f]`, length `2n + 1`; the
/// original elements land on odd indices.
pub fn intersperse<T: Copy>(items: &[T], filler: T) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len() * 2 + 1);
    out.push(filler);
    for &item in items {
        out.push(item);
        out.push(filler);
    }
    out
}

/// Rescale word2ph for an interspersed phoneme sequence.
///
/// Every count doubles and the leading token absorbs the extra filler, so
/// the sum goes from `n` to `2n + 1`.
pub fn adjust_word2ph_for_blanks(word2ph: &[usize]) -> Vec<usize> {
    let mut adjusted: Vec<usize> = word2ph.iter().map(|&count| count * 2).collect();
    if let Some(first) = adjusted.first_mut() {
        *first += 1;
    }
    adjusted
}

/// Lay out a sequence as a `[1, len]` batch.
pub fn batch_row<T: Copy + Default>(items: &[T]) -> Array2<T> {
    let mut batch = Array2::<T>::default((1, items.len()));
    for (i, &item) in items.iter().enumerate() {
        batch[[0, i]] = item;
    }
    batch
}

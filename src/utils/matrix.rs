//! Dense vector/matrix primitives.
//!
//! Matrices are flat row-major `[f32]` buffers with explicit (rows, cols)
//! dimensions, matching the layout every layer stores its weights in. The
//! callers validate shapes once at construction, so these helpers only
//! debug-assert lengths.

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dot: length mismatch");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// `out = M x` for a row-major (rows x cols) matrix.
pub fn mat_vec(matrix: &[f32], rows: usize, cols: usize, x: &[f32], out: &mut [f32]) {
    debug_assert_eq!(matrix.len(), rows * cols, "mat_vec: matrix length mismatch");
    debug_assert_eq!(x.len(), cols, "mat_vec: input length mismatch");
    debug_assert_eq!(out.len(), rows, "mat_vec: output length mismatch");

    for (row, value) in matrix.chunks_exact(cols).zip(out.iter_mut()) {
        *value = dot(row, x);
    }
}

/// `out += Mᵀ y` for a row-major (rows x cols) matrix; `out` has `cols`
/// elements. Accumulating form because backward passes sum contributions
/// from several weight matrices into one upstream gradient.
pub fn mat_vec_transposed_acc(
    matrix: &[f32],
    rows: usize,
    cols: usize,
    y: &[f32],
    out: &mut [f32],
) {
    debug_assert_eq!(matrix.len(), rows * cols);
    debug_assert_eq!(y.len(), rows);
    debug_assert_eq!(out.len(), cols);

    for (row, &yi) in matrix.chunks_exact(cols).zip(y.iter()) {
        for (o, &w) in out.iter_mut().zip(row.iter()) {
            *o += yi * w;
        }
    }
}

/// `acc += y ⊗ x`: rank-one update of a row-major (y.len x x.len) buffer.
pub fn outer_acc(y: &[f32], x: &[f32], acc: &mut [f32]) {
    debug_assert_eq!(acc.len(), y.len() * x.len(), "outer_acc: buffer length mismatch");

    for (row, &yi) in acc.chunks_exact_mut(x.len()).zip(y.iter()) {
        for (a, &xj) in row.iter_mut().zip(x.iter()) {
            *a += yi * xj;
        }
    }
}

/// Element-wise `acc += src`.
pub fn add_assign(acc: &mut [f32], src: &[f32]) {
    debug_assert_eq!(acc.len(), src.len(), "add_assign: length mismatch");
    for (a, &s) in acc.iter_mut().zip(src.iter()) {
        *a += s;
    }
}

/// Element-wise `buf *= factor`.
pub fn scale(buf: &mut [f32], factor: f32) {
    for v in buf.iter_mut() {
        *v *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(dot(&[], &[]), 0.0);
    }

    #[test]
    fn test_mat_vec() {
        // [1 2; 3 4] * [5, 6] = [17, 39]
        let m = [1.0, 2.0, 3.0, 4.0];
        let mut out = [0.0; 2];
        mat_vec(&m, 2, 2, &[5.0, 6.0], &mut out);
        assert_eq!(out, [17.0, 39.0]);
    }

    #[test]
    fn test_mat_vec_transposed_acc() {
        // [1 2; 3 4]ᵀ * [5, 6] = [23, 34], accumulated onto [1, 1]
        let m = [1.0, 2.0, 3.0, 4.0];
        let mut out = [1.0, 1.0];
        mat_vec_transposed_acc(&m, 2, 2, &[5.0, 6.0], &mut out);
        assert_eq!(out, [24.0, 35.0]);
    }

    #[test]
    fn test_outer_acc() {
        let mut acc = vec![0.0; 6];
        outer_acc(&[1.0, 2.0], &[3.0, 4.0, 5.0], &mut acc);
        assert_eq!(acc, vec![3.0, 4.0, 5.0, 6.0, 8.0, 10.0]);

        // Second call accumulates instead of overwriting.
        outer_acc(&[1.0, 2.0], &[3.0, 4.0, 5.0], &mut acc);
        assert_eq!(acc, vec![6.0, 8.0, 10.0, 12.0, 16.0, 20.0]);
    }

    #[test]
    fn test_add_assign_and_scale() {
        let mut acc = vec![1.0, 2.0];
        add_assign(&mut acc, &[0.5, 0.5]);
        assert_eq!(acc, vec![1.5, 2.5]);
        scale(&mut acc, 2.0);
        assert_eq!(acc, vec![3.0, 5.0]);
    }
}

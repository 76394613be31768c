//! Integer matrices and per-side weight tensors.

use serde::{Deserialize, Serialize};

/// A dense row-major matrix of signed integers.
///
/// Used for one layer of weights (`K[layer] × N[layer]`) and for stimuli.
/// Serialized as nested rows so stored results stay human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Vec<i32>>", try_from = "Vec<Vec<i32>>")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
}

impl Matrix {
    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols],
        }
    }

    /// Build a matrix by calling `f(row, col)` for every entry in row-major order.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> i32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    /// Build a matrix from explicit rows.
    ///
    /// Returns `None` if the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<i32>>) -> Option<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let n_rows = rows.len();
        Some(Self {
            rows: n_rows,
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Entry at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> i32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: i32) {
        self.data[row * self.cols + col] = value;
    }

    /// Borrow one row.
    #[inline]
    pub fn row(&self, row: usize) -> &[i32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Mutably borrow one row.
    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [i32] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// All entries in row-major order.
    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    /// Convert to nested rows.
    pub fn to_rows(&self) -> Vec<Vec<i32>> {
        (0..self.rows).map(|i| self.row(i).to_vec()).collect()
    }
}

impl From<Matrix> for Vec<Vec<i32>> {
    fn from(matrix: Matrix) -> Self {
        matrix.to_rows()
    }
}

impl TryFrom<Vec<Vec<i32>>> for Matrix {
    type Error = String;

    fn try_from(rows: Vec<Vec<i32>>) -> Result<Self, Self::Error> {
        Matrix::from_rows(rows).ok_or_else(|| "ragged matrix rows".to_string())
    }
}

/// The public stimulus broadcast to both sides each iteration (`K[0] × N[0]`).
pub type StimulusTensor = Matrix;

/// One side's full set of weights: one matrix per layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTensor {
    layers: Vec<Matrix>,
}

impl WeightTensor {
    pub fn new(layers: Vec<Matrix>) -> Self {
        Self { layers }
    }

    /// Number of layers (H).
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> &Matrix {
        &self.layers[index]
    }

    pub fn layer_mut(&mut self, index: usize) -> &mut Matrix {
        &mut self.layers[index]
    }

    pub fn layers(&self) -> &[Matrix] {
        &self.layers
    }

    /// Elementwise comparison across every layer.
    ///
    /// Stops at the first differing scalar. Tensors of different shape are
    /// never equal.
    pub fn same_weights(&self, other: &WeightTensor) -> bool {
        if self.layers.len() != other.layers.len() {
            return false;
        }
        self.layers.iter().zip(&other.layers).all(|(a, b)| {
            a.rows == b.rows
                && a.cols == b.cols
                && a.data.iter().zip(&b.data).all(|(x, y)| x == y)
        })
    }

    /// Total number of weights (Σ K[l]·N[l]).
    pub fn len(&self) -> usize {
        self.layers.iter().map(|m| m.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The weights of both sides of a trial at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorPair {
    pub a: WeightTensor,
    pub b: WeightTensor,
}

impl TensorPair {
    /// Whether both sides hold identical weights.
    pub fn synchronized(&self) -> bool {
        self.a.same_weights(&self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(rows: Vec<Vec<Vec<i32>>>) -> WeightTensor {
        WeightTensor::new(
            rows.into_iter()
                .map(|r| Matrix::from_rows(r).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_same_weights_reflexive() {
        let w = tensor(vec![vec![vec![1, -2], vec![0, 3]], vec![vec![2, 2]]]);
        assert!(w.same_weights(&w));
        assert!(w.same_weights(&w.clone()));
    }

    #[test]
    fn test_single_difference_breaks_equality() {
        let a = tensor(vec![vec![vec![1, -2], vec![0, 3]], vec![vec![2, 2]]]);
        for layer in 0..a.depth() {
            let m = a.layer(layer);
            for i in 0..m.rows() {
                for j in 0..m.cols() {
                    let mut b = a.clone();
                    let v = b.layer(layer).get(i, j);
                    b.layer_mut(layer).set(i, j, v + 1);
                    assert!(!a.same_weights(&b), "difference at {layer},{i},{j}");
                }
            }
        }
    }

    #[test]
    fn test_shape_mismatch_is_unequal() {
        let a = tensor(vec![vec![vec![1, 1]]]);
        let b = tensor(vec![vec![vec![1], vec![1]]]);
        assert!(!a.same_weights(&b));
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        assert!(Matrix::from_rows(vec![vec![1, 2], vec![3]]).is_none());
    }

    #[test]
    fn test_matrix_serializes_as_nested_rows() {
        let m = Matrix::from_rows(vec![vec![1, -1], vec![2, 0]]).unwrap();
        assert_eq!(serde_json::to_string(&m).unwrap(), "[[1,-1],[2,0]]");
        let back: Matrix = serde_json::from_str("[[1,-1],[2,0]]").unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_len_counts_all_weights() {
        let w = tensor(vec![vec![vec![0; 4]; 3], vec![vec![0; 3]]]);
        assert_eq!(w.len(), 15);
    }
}

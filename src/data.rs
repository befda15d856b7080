//! Data
//!
//! Dense storage handed to the built-in regressors during training.

/// Contiguous Column Major Matrix data container.
///
/// One column per Train-role variable, one row per selected event.
pub struct Matrix<'a, T> {
    /// The raw data stored in a single slice.
    pub data: &'a [T],
    /// Row indices into the data.
    pub index: Vec<usize>,
    /// Number of rows in the matrix.
    pub rows: usize,
    /// Number of columns in the matrix.
    pub cols: usize,
    stride1: usize,
    stride2: usize,
}

impl<'a, T> Matrix<'a, T> {
    // Defaults to column major
    /// Create a new Matrix.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Self {
        Matrix {
            data,
            index: (0..rows).collect(),
            rows,
            cols,
            stride1: rows,
            stride2: 1,
        }
    }

    /// Get a single reference to an item in the matrix.
    ///
    /// * `i` - The ith row of the data to get.
    /// * `j` - the jth column of the data to get.
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[self.item_index(i, j)]
    }

    fn item_index(&self, i: usize, j: usize) -> usize {
        let mut idx = self.stride2 * i;
        idx += j * self.stride1;
        idx
    }

    /// Get access to a row of the data, as an iterator.
    pub fn get_row_iter(&self, row: usize) -> std::iter::StepBy<std::iter::Skip<std::slice::Iter<'a, T>>> {
        self.data.iter().skip(row).step_by(self.rows)
    }

    /// Get an entire column in the matrix.
    ///
    /// * `col` - The index of the column to get.
    pub fn get_col(&self, col: usize) -> &[T] {
        let i = self.item_index(0, col);
        let j = self.item_index(self.rows, col);
        &self.data[i..j]
    }
}

impl<'a, T> Matrix<'a, T>
where
    T: Copy,
{
    /// Get a row of the data as a vector.
    pub fn get_row(&self, row: usize) -> Vec<T> {
        self.get_row_iter(row).copied().collect()
    }
}

/// Row-wise event sample collected during the training pass,
/// flattened to column major once the selection is complete.
#[derive(Debug, Default, Clone)]
pub struct Sample {
    /// Feature rows, one per accepted event.
    pub features: Vec<Vec<f64>>,
    /// Target rows, one per accepted event.
    pub targets: Vec<Vec<f64>>,
}

impl Sample {
    pub fn new() -> Self {
        Sample::default()
    }

    pub fn push(&mut self, features: Vec<f64>, targets: Vec<f64>) {
        self.features.push(features);
        self.targets.push(targets);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Column major feature block for the rows in `index`.
    pub fn feature_block(&self, index: &[usize], n_features: usize) -> Vec<f64> {
        let mut block = Vec::with_capacity(index.len() * n_features);
        for col in 0..n_features {
            block.extend(index.iter().map(|&row| self.features[row][col]));
        }
        block
    }

    /// Target column `target` for the rows in `index`.
    pub fn target_column(&self, index: &[usize], target: usize) -> Vec<f64> {
        index.iter().map(|&row| self.targets[row][target]).collect()
    }
}

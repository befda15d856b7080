//! Event Sources
//!
//! The tabular event data is owned by an external collaborator. The crate
//! only needs three things from it: the column names, the number of entries,
//! and a way to read one entry into a row buffer.
use crate::errors::CalibrationError;
use crate::registry::VariableRegistry;
use hashbrown::HashSet;
use log::debug;

/// A sequential, entry-addressable table of floating point records.
pub trait EventSource {
    /// Column names, in storage order.
    fn columns(&self) -> &[String];
    /// Number of entries available.
    fn entries(&self) -> u64;
    /// Read `entry` into `row` (one value per column).
    ///
    /// Returns the number of bytes read. A negative value reports a failed read.
    fn read_entry(&mut self, entry: u64, row: &mut [f64]) -> i64;
}

/// A live binding between a [`VariableRegistry`] and an [`EventSource`].
///
/// Created by [`VariableRegistry::bind`]. The column of every slot is resolved
/// once, so loading an entry is a straight copy.
pub struct Cursor<'a, S: EventSource> {
    registry: &'a mut VariableRegistry,
    source: &'a mut S,
    columns: Vec<usize>,
    row: Vec<f64>,
    next: u64,
    bytes: u64,
}

impl<'a, S: EventSource> Cursor<'a, S> {
    pub(crate) fn new(registry: &'a mut VariableRegistry, source: &'a mut S, columns: Vec<usize>) -> Self {
        let width = source.columns().len();
        Cursor {
            registry,
            source,
            columns,
            row: vec![f64::NAN; width],
            next: 0,
            bytes: 0,
        }
    }

    pub fn entries(&self) -> u64 {
        self.source.entries()
    }

    /// Total bytes read through this cursor.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    pub fn registry(&self) -> &VariableRegistry {
        &*self.registry
    }

    /// Load `entry` into the registry.
    ///
    /// The registry is reset first; NaN values in the source stay unset.
    pub fn load(&mut self, entry: u64) -> Result<(), CalibrationError> {
        self.registry.reset();
        let bytes = self.source.read_entry(entry, &mut self.row);
        if bytes < 0 {
            return Err(CalibrationError::SourceRead { entry, bytes });
        }
        self.bytes += bytes as u64;
        for (slot, &col) in self.columns.iter().enumerate() {
            let value = self.row[col];
            self.registry
                .set_slot(slot, if value.is_nan() { None } else { Some(value) });
        }
        self.next = entry + 1;
        Ok(())
    }

    /// Advance to the next entry, returning its index, or `None` once the
    /// source is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<u64>, CalibrationError> {
        if self.next >= self.source.entries() {
            return Ok(None);
        }
        let entry = self.next;
        self.load(entry)?;
        Ok(Some(entry))
    }
}

/// In-memory table, used to embed the calibration in other programs and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
    failures: HashSet<u64>,
}

impl MemorySource {
    pub fn new<S: Into<String>>(columns: Vec<S>, rows: Vec<Vec<f64>>) -> Self {
        MemorySource {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            failures: HashSet::new(),
        }
    }

    /// Append a record. Missing trailing values read as NaN.
    pub fn push(&mut self, row: Vec<f64>) {
        self.rows.push(row);
    }

    /// Make reads of `entry` report a failure.
    pub fn with_failure(mut self, entry: u64) -> Self {
        self.failures.insert(entry);
        self
    }
}

impl EventSource for MemorySource {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn entries(&self) -> u64 {
        self.rows.len() as u64
    }

    fn read_entry(&mut self, entry: u64, row: &mut [f64]) -> i64 {
        if self.failures.contains(&entry) {
            debug!("Simulated read failure for entry {}.", entry);
            return -1;
        }
        let record = match self.rows.get(entry as usize) {
            Some(r) => r,
            None => return -1,
        };
        for (i, v) in row.iter_mut().enumerate() {
            *v = record.get(i).copied().unwrap_or(f64::NAN);
        }
        (row.len() * std::mem::size_of::<f32>()) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads() {
        let mut source = MemorySource::new(vec!["a", "b"], vec![vec![1.0, 2.0], vec![3.0]]);
        let mut row = vec![0.0; 2];
        assert_eq!(source.read_entry(0, &mut row), 8);
        assert_eq!(row, vec![1.0, 2.0]);
        assert_eq!(source.read_entry(1, &mut row), 8);
        assert_eq!(row[0], 3.0);
        assert!(row[1].is_nan());
        assert!(source.read_entry(2, &mut row) < 0);
    }

    #[test]
    fn test_cursor_read_failure() {
        let mut source = MemorySource::new(vec!["a"], vec![vec![1.0], vec![2.0], vec![3.0]]).with_failure(1);
        let mut registry = VariableRegistry::new(vec!["a"]).unwrap();
        let mut cursor = registry.bind(&mut source).unwrap();
        assert_eq!(cursor.next_entry().unwrap(), Some(0));
        let err = cursor.next_entry().unwrap_err();
        assert!(matches!(err, CalibrationError::SourceRead { entry: 1, bytes: -1 }));
        // a failed read leaves the registry reset
        assert_eq!(cursor.registry().get("a").unwrap(), None);
    }

    #[test]
    fn test_cursor_nan_is_unset() {
        let mut source = MemorySource::new(vec!["a", "b"], vec![vec![f64::NAN, 2.0]]);
        let mut registry = VariableRegistry::new(vec!["b", "a"]).unwrap();
        let mut cursor = registry.bind(&mut source).unwrap();
        cursor.load(0).unwrap();
        assert_eq!(cursor.registry().get("a").unwrap(), None);
        assert_eq!(cursor.registry().get("b").unwrap(), Some(2.0));
        assert_eq!(cursor.bytes_read(), 8);
    }
}

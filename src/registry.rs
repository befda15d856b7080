//! Variable Registry
//!
//! Maps named physics quantities to dense storage slots. The slot order is the
//! storage layout and also the schema handed to a tabular writer.
use crate::constants::SCHEMA_SEPARATOR;
use crate::errors::CalibrationError;
use crate::source::{Cursor, EventSource};
use hashbrown::HashMap;

/// Named, slot-indexed values for the record currently being processed.
///
/// A slot holding `None` is unset: it was reset and nothing has been written
/// since, so downstream consumers can detect missing data without errors.
#[derive(Debug, Clone)]
pub struct VariableRegistry {
    names: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<Option<f64>>,
}

impl VariableRegistry {
    /// Create a registry, assigning slots `0..N-1` in the order given.
    ///
    /// * `names` - Ordered, unique variable names.
    pub fn new<I, S>(names: I) -> Result<Self, CalibrationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = VariableRegistry {
            names: Vec::new(),
            index: HashMap::new(),
            values: Vec::new(),
        };
        for name in names {
            let name = name.into();
            if registry.index.contains_key(&name) {
                return Err(CalibrationError::DuplicateVariable(name));
            }
            registry.index.insert(name.clone(), registry.names.len());
            registry.names.push(name);
        }
        registry.values = vec![None; registry.names.len()];
        Ok(registry)
    }

    /// Rebuild a registry from a colon separated schema string.
    pub fn from_schema(schema: &str) -> Result<Self, CalibrationError> {
        if schema.is_empty() {
            return VariableRegistry::new(Vec::<String>::new());
        }
        VariableRegistry::new(schema.split(SCHEMA_SEPARATOR))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Slot assigned to `name`.
    pub fn slot(&self, name: &str) -> Result<usize, CalibrationError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CalibrationError::UnknownVariable(name.to_string()))
    }

    /// Current value of `name`, `None` if unset.
    pub fn get(&self, name: &str) -> Result<Option<f64>, CalibrationError> {
        let slot = self.slot(name)?;
        Ok(self.values[slot])
    }

    pub fn set(&mut self, name: &str, value: f64) -> Result<(), CalibrationError> {
        let slot = self.slot(name)?;
        self.values[slot] = Some(value);
        Ok(())
    }

    /// Value in `slot`. Slots come from [`VariableRegistry::slot`], so an
    /// out of range slot reads as unset.
    #[inline]
    pub fn get_slot(&self, slot: usize) -> Option<f64> {
        self.values.get(slot).copied().flatten()
    }

    #[inline]
    pub fn set_slot(&mut self, slot: usize, value: Option<f64>) {
        if let Some(v) = self.values.get_mut(slot) {
            *v = value;
        }
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Mark every slot as unset.
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// Colon joined name list, in slot order.
    pub fn serialize(&self) -> String {
        let mut schema = String::new();
        for (i, name) in self.names.iter().enumerate() {
            if i > 0 {
                schema.push(SCHEMA_SEPARATOR);
            }
            schema.push_str(name);
        }
        schema
    }

    /// Bind this registry to a data source.
    ///
    /// Every registered name is resolved to a source column once; advancing the
    /// returned cursor then copies each record straight into the slots.
    pub fn bind<'a, S: EventSource>(&'a mut self, source: &'a mut S) -> Result<Cursor<'a, S>, CalibrationError> {
        let mut columns = Vec::with_capacity(self.names.len());
        for name in &self.names {
            match source.columns().iter().position(|c| c == name) {
                Some(col) => columns.push(col),
                None => {
                    return Err(CalibrationError::Configuration(format!(
                        "variable {} is not provided by the data source",
                        name
                    )))
                }
            }
        }
        Ok(Cursor::new(self, source, columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn names() -> Vec<&'static str> {
        vec!["ePar", "eLeadBHCal", "eLeadBEMC", "hLeadBHCal"]
    }

    #[test]
    fn test_slots_are_contiguous() {
        let registry = VariableRegistry::new(names()).unwrap();
        assert_eq!(registry.len(), 4);
        for (i, name) in names().iter().enumerate() {
            assert_eq!(registry.slot(name).unwrap(), i);
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = VariableRegistry::new(vec!["ePar", "eLeadBHCal", "ePar"]).unwrap_err();
        assert!(matches!(err, CalibrationError::DuplicateVariable(n) if n == "ePar"));
    }

    #[test]
    fn test_get_set_reset() {
        let mut registry = VariableRegistry::new(names()).unwrap();
        for name in names() {
            assert_eq!(registry.get(name).unwrap(), None);
        }
        registry.set("eLeadBHCal", 3.25).unwrap();
        assert_eq!(registry.get("eLeadBHCal").unwrap(), Some(3.25));
        registry.reset();
        for name in names() {
            assert_eq!(registry.get(name).unwrap(), None);
        }
    }

    #[test]
    fn test_unknown_variable() {
        let mut registry = VariableRegistry::new(names()).unwrap();
        assert!(matches!(
            registry.get("eSumImage"),
            Err(CalibrationError::UnknownVariable(_))
        ));
        assert!(matches!(
            registry.set("eSumImage", 1.0),
            Err(CalibrationError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let registry = VariableRegistry::new(names()).unwrap();
        let schema = registry.serialize();
        assert_eq!(schema, "ePar:eLeadBHCal:eLeadBEMC:hLeadBHCal");
        let rebuilt = VariableRegistry::from_schema(&schema).unwrap();
        assert_eq!(rebuilt.names(), registry.names());
        assert!(VariableRegistry::from_schema("").unwrap().is_empty());
    }

    #[test]
    fn test_bind_follows_source_cursor() {
        let mut source = MemorySource::new(
            vec!["hLeadBHCal", "ePar", "eLeadBEMC", "eLeadBHCal", "nClustBHCal"],
            vec![vec![0.1, 2.0, 0.5, 1.5, 3.0], vec![-0.2, 4.0, 1.0, 2.5, 1.0]],
        );
        let mut registry = VariableRegistry::new(names()).unwrap();
        let mut cursor = registry.bind(&mut source).unwrap();
        assert_eq!(cursor.next_entry().unwrap(), Some(0));
        assert_eq!(cursor.registry().get("ePar").unwrap(), Some(2.0));
        assert_eq!(cursor.registry().get("eLeadBHCal").unwrap(), Some(1.5));
        assert_eq!(cursor.next_entry().unwrap(), Some(1));
        assert_eq!(cursor.registry().get("hLeadBHCal").unwrap(), Some(-0.2));
        assert_eq!(cursor.next_entry().unwrap(), None);
    }

    #[test]
    fn test_bind_missing_column() {
        let mut source = MemorySource::new(vec!["ePar"], vec![vec![1.0]]);
        let mut registry = VariableRegistry::new(names()).unwrap();
        assert!(matches!(
            registry.bind(&mut source),
            Err(CalibrationError::Configuration(_))
        ));
    }
}

//! Mapping from generated operations back to source lines

use serde::{Deserialize, Serialize};

use super::ast::SourcePosition;
use super::ir::UnitRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPosition {
    pub unit: UnitRef,
    /// Operation index inside the unit
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub generated: GeneratedPosition,
    pub source_line: usize,
    pub source_column: usize,
}

/// Append-only list of mappings, one per lowered statement, in emission order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceMap {
    pub source_name: String,
    pub mappings: Vec<SourceMapping>,
}

impl SourceMap {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            mappings: Vec::new(),
        }
    }

    pub fn add(&mut self, unit: &UnitRef, index: usize, position: SourcePosition) {
        self.mappings.push(SourceMapping {
            generated: GeneratedPosition {
                unit: unit.clone(),
                index,
            },
            source_line: position.line,
            source_column: position.column,
        });
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn for_unit<'a>(&'a self, unit: &'a UnitRef) -> impl Iterator<Item = &'a SourceMapping> {
        self.mappings
            .iter()
            .filter(move |m| &m.generated.unit == unit)
    }

    /// Statement that produced the operation at `index`.
    ///
    /// Picks the mapping with the greatest index not after `index`; among
    /// mappings sharing that index (parallel members) the first one wins.
    pub fn lookup(&self, unit: &UnitRef, index: usize) -> Option<&SourceMapping> {
        let mut best: Option<&SourceMapping> = None;
        for mapping in self.mappings.iter().filter(|m| &m.generated.unit == unit) {
            if mapping.generated.index > index {
                continue;
            }
            match best {
                Some(current) if current.generated.index >= mapping.generated.index => {}
                _ => best = Some(mapping),
            }
        }
        best
    }
}

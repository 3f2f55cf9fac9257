//! Notebook documents as seen by the program aggregator.
//!
//! Supports the worksheet layout (`worksheets[*].cells`, title in
//! `metadata.name`) that program cells were introduced with, and the flat
//! `cells` layout where the title comes from the file name. Keys this crate
//! does not interpret are written back untouched.

use std::path::Path;

use anyhow::Result;
use log::debug;
use serde_json::{Map, Value};

use crate::cell::{CellVariant, LpProgramCell, NotebookCell};
use crate::error::RecordError;

/// Read access to an ordered collection of cells and its display title.
pub trait Notebook {
    fn notebook_name(&self) -> &str;

    fn ncells(&self) -> usize;

    fn cell(&self, index: usize) -> Option<&NotebookCell>;

    /// Program cells in notebook order.
    fn lpprogram_cells(&self) -> Vec<&LpProgramCell> {
        (0..self.ncells())
            .filter_map(|i| self.cell(i).and_then(NotebookCell::as_lpprogram))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Layout {
    /// One entry per worksheet: its non-cell fields and how many cells it holds
    Worksheets(Vec<(Map<String, Value>, usize)>),
    Flat,
}

/// A notebook loaded from (or destined for) a `.ipynb` file.
#[derive(Debug)]
pub struct NotebookDocument {
    name: String,
    layout: Layout,
    /// Top-level fields other than cells/worksheets
    fields: Map<String, Value>,
    cells: Vec<NotebookCell>,
}

impl NotebookDocument {
    /// An in-memory notebook with a single worksheet.
    pub fn new(name: impl Into<String>, cells: Vec<NotebookCell>) -> Self {
        let name = name.into();
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), Value::String(name.clone()));
        let mut fields = Map::new();
        fields.insert("metadata".to_string(), Value::Object(metadata));
        fields.insert("nbformat".to_string(), Value::from(3));
        fields.insert("nbformat_minor".to_string(), Value::from(0));

        let count = cells.len();
        NotebookDocument {
            name,
            layout: Layout::Worksheets(vec![(Map::new(), count)]),
            fields,
            cells,
        }
    }

    /// Parse a notebook. `fallback_name` is used when the document does not
    /// carry its own name.
    pub fn from_json(value: Value, fallback_name: &str) -> Result<Self, RecordError> {
        let Value::Object(mut fields) = value else {
            return Err(RecordError::MissingCells);
        };

        let mut cells = Vec::new();
        let layout = if let Some(worksheets) = fields.remove("worksheets") {
            let worksheets: Vec<Map<String, Value>> = serde_json::from_value(worksheets)?;
            let mut sheets = Vec::with_capacity(worksheets.len());
            for mut sheet in worksheets {
                let sheet_cells: Vec<Value> = match sheet.remove("cells") {
                    Some(value) => serde_json::from_value(value)?,
                    None => Vec::new(),
                };
                let count = sheet_cells.len();
                for cell in sheet_cells {
                    cells.push(NotebookCell::from_json(cell)?);
                }
                sheets.push((sheet, count));
            }
            Layout::Worksheets(sheets)
        } else if let Some(flat) = fields.remove("cells") {
            let flat: Vec<Value> = serde_json::from_value(flat)?;
            for cell in flat {
                cells.push(NotebookCell::from_json(cell)?);
            }
            Layout::Flat
        } else {
            return Err(RecordError::MissingCells);
        };

        let name = fields
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback_name)
            .to_string();

        debug!("Parsed notebook {:?} with {} cells", name, cells.len());

        Ok(NotebookDocument {
            name,
            layout,
            fields,
            cells,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut fields = self.fields.clone();
        let mut cells = self.cells.iter().map(CellVariant::to_json);
        match &self.layout {
            Layout::Worksheets(sheets) => {
                let worksheets: Vec<Value> = sheets
                    .iter()
                    .map(|(sheet, count)| {
                        let mut sheet = sheet.clone();
                        let sheet_cells: Vec<Value> = cells.by_ref().take(*count).collect();
                        sheet.insert("cells".to_string(), Value::Array(sheet_cells));
                        Value::Object(sheet)
                    })
                    .collect();
                fields.insert("worksheets".to_string(), Value::Array(worksheets));
            }
            Layout::Flat => {
                fields.insert("cells".to_string(), Value::Array(cells.collect()));
            }
        }
        Value::Object(fields)
    }

    /// Load a notebook file. The file stem is the fallback title.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Ok(Self::from_json(value, stem)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Rename the notebook. Program module names are not refreshed here; call
    /// [`crate::program::LpProgram::update_module_name`] afterwards.
    pub fn set_notebook_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        if let Layout::Worksheets(_) = self.layout {
            let metadata = self
                .fields
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(metadata) = metadata {
                metadata.insert("name".to_string(), Value::String(self.name.clone()));
            }
        }
    }

    pub fn cells(&self) -> &[NotebookCell] {
        &self.cells
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut NotebookCell> {
        self.cells.get_mut(index)
    }

    /// Append a cell to the last worksheet.
    pub fn push_cell(&mut self, cell: impl Into<NotebookCell>) {
        self.cells.push(cell.into());
        if let Layout::Worksheets(sheets) = &mut self.layout {
            match sheets.last_mut() {
                Some((_, count)) => *count += 1,
                None => sheets.push((Map::new(), 1)),
            }
        }
    }
}

impl Notebook for NotebookDocument {
    fn notebook_name(&self) -> &str {
        &self.name
    }

    fn ncells(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, index: usize) -> Option<&NotebookCell> {
        self.cells.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn worksheet_notebook() -> Value {
        json!({
            "metadata": {"name": "Family Tree"},
            "nbformat": 3,
            "nbformat_minor": 0,
            "worksheets": [
                {
                    "metadata": {},
                    "cells": [
                        {"cell_type": "markdown", "source": "# Facts", "metadata": {}},
                        {"cell_type": "lpprogram", "input": "parent(tom, bob).", "outputs": [], "collapsed": false, "language": "prolog", "metadata": {}}
                    ]
                },
                {
                    "metadata": {},
                    "cells": [
                        {"cell_type": "lpprogram", "input": "ancestor(X, Y) :- parent(X, Y).", "outputs": [], "collapsed": true, "language": "prolog", "metadata": {}}
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_worksheets_are_flattened_in_order() {
        let notebook = NotebookDocument::from_json(worksheet_notebook(), "ignored").unwrap();
        assert_eq!(notebook.notebook_name(), "Family Tree");
        assert_eq!(notebook.ncells(), 3);

        let texts: Vec<&str> = notebook.lpprogram_cells().iter().map(|c| c.text()).collect();
        assert_eq!(
            texts,
            vec!["parent(tom, bob).", "ancestor(X, Y) :- parent(X, Y)."]
        );
    }

    #[test]
    fn test_worksheet_round_trip_is_lossless() {
        let original = worksheet_notebook();
        let notebook = NotebookDocument::from_json(original.clone(), "ignored").unwrap();
        assert_eq!(notebook.to_json(), original);
    }

    #[test]
    fn test_flat_layout_uses_fallback_name() {
        let value = json!({
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5,
            "cells": [
                {"cell_type": "lpprogram", "input": "a.", "outputs": [], "collapsed": false, "language": "prolog", "metadata": {}}
            ]
        });
        let notebook = NotebookDocument::from_json(value.clone(), "Untitled0").unwrap();
        assert_eq!(notebook.notebook_name(), "Untitled0");
        assert_eq!(notebook.to_json(), value);
    }

    #[test]
    fn test_missing_cells_is_an_error() {
        let err = NotebookDocument::from_json(json!({"metadata": {}}), "x").unwrap_err();
        assert!(matches!(err, RecordError::MissingCells));
    }

    #[test]
    fn test_rename_updates_metadata() {
        let mut notebook = NotebookDocument::from_json(worksheet_notebook(), "ignored").unwrap();
        notebook.set_notebook_name("Kinship");
        assert_eq!(notebook.notebook_name(), "Kinship");
        assert_eq!(notebook.to_json()["metadata"]["name"], "Kinship");
    }

    #[test]
    fn test_push_cell_lands_in_last_worksheet() {
        let mut notebook = NotebookDocument::new("Scratch", Vec::new());
        notebook.push_cell(LpProgramCell::new("a."));
        notebook.push_cell(LpProgramCell::new("b."));

        let value = notebook.to_json();
        assert_eq!(value["worksheets"][0]["cells"][1]["input"], "b.");
        assert_eq!(value["metadata"]["name"], "Scratch");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Family Tree.ipynb");
        let notebook = NotebookDocument::from_json(worksheet_notebook(), "ignored").unwrap();
        notebook.save(&path).unwrap();

        let loaded = NotebookDocument::load(&path).unwrap();
        assert_eq!(loaded.to_json(), worksheet_notebook());
    }
}

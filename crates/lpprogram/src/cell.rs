//! Notebook cells and the persisted `lpprogram` cell record.
//!
//! A notebook mixes program cells with cells of other types. Program cells
//! are modelled in full; every other cell is carried through as raw JSON so
//! a notebook can be read and written back without losing anything.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::{Callbacks, ExecutionChannel};
use crate::error::{CompileError, RecordError};
use crate::notebook::Notebook;
use crate::output_area::OutputArea;
use crate::program::LpProgram;

/// `cell_type` tag of program cells.
pub const LPPROGRAM_CELL_TYPE: &str = "lpprogram";

/// `language` tag written on every program cell.
pub const LPPROGRAM_LANGUAGE: &str = "prolog";

/// Input prompt shown while a request is in flight.
pub const RUNNING_PROMPT: &str = "*";

/// Behaviour shared by every cell variant stored in a notebook.
pub trait CellVariant {
    fn cell_type(&self) -> &str;

    /// Serialize to the persisted notebook record.
    fn to_json(&self) -> Value;

    /// Rebuild a cell from its persisted record.
    fn from_json(value: Value) -> Result<Self, RecordError>
    where
        Self: Sized;
}

/// The input prompt: an execution count, or a marker such as `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptNumber {
    Count(u64),
    Marker(String),
}

impl PromptNumber {
    pub fn running() -> Self {
        PromptNumber::Marker(RUNNING_PROMPT.to_string())
    }
}

fn default_language() -> String {
    LPPROGRAM_LANGUAGE.to_string()
}

/// On-disk form of a program cell.
///
/// Every field except `cell_type` may be missing and falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpProgramCellRecord {
    pub cell_type: String,
    #[serde(default)]
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_number: Option<PromptNumber>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Text to place in the cell after this one, as requested by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextInput {
    pub text: String,
    pub replace: bool,
}

/// Cell state written by kernel callbacks.
#[derive(Debug, Default)]
pub struct CellState {
    pub prompt_number: Option<PromptNumber>,
    pub output_area: OutputArea,
    pub running: bool,
    pub next_input: Option<NextInput>,
}

/// A program cell. Its text is one fragment of the notebook's program.
#[derive(Debug)]
pub struct LpProgramCell {
    input: String,
    collapsed: bool,
    metadata: Map<String, Value>,
    state: Arc<StdMutex<CellState>>,
}

impl Default for LpProgramCell {
    fn default() -> Self {
        Self::new("")
    }
}

impl LpProgramCell {
    pub fn new(input: impl Into<String>) -> Self {
        LpProgramCell {
            input: input.into(),
            collapsed: false,
            metadata: Map::new(),
            state: Arc::new(StdMutex::new(CellState::default())),
        }
    }

    pub fn text(&self) -> &str {
        &self.input
    }

    pub fn set_text(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn collapse(&mut self) {
        self.collapsed = true;
    }

    pub fn expand(&mut self) {
        self.collapsed = false;
    }

    pub fn state(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn prompt_number(&self) -> Option<PromptNumber> {
        self.state().prompt_number.clone()
    }

    pub fn set_input_prompt(&self, prompt_number: Option<PromptNumber>) {
        self.state().prompt_number = prompt_number;
    }

    pub fn outputs(&self) -> Vec<Value> {
        self.state().output_area.to_json()
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Give up waiting on a run that never got its reply.
    ///
    /// Clears the running flag and drops the running marker from the prompt,
    /// so a saved notebook does not show the cell as still executing. Returns
    /// whether the cell was running. Outputs received so far are kept.
    pub fn abandon_run(&self) -> bool {
        let mut state = self.state();
        let was_running = state.running;
        state.running = false;
        if state.prompt_number == Some(PromptNumber::running()) {
            state.prompt_number = None;
        }
        was_running
    }

    /// Take the pending `set_next_input` request, if the kernel sent one.
    pub fn take_next_input(&self) -> Option<NextInput> {
        self.state().next_input.take()
    }

    pub fn to_record(&self) -> LpProgramCellRecord {
        let state = self.state();
        LpProgramCellRecord {
            cell_type: LPPROGRAM_CELL_TYPE.to_string(),
            input: self.input.clone(),
            prompt_number: state.prompt_number.clone(),
            outputs: state.output_area.to_json(),
            collapsed: self.collapsed,
            language: LPPROGRAM_LANGUAGE.to_string(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn from_record(record: LpProgramCellRecord) -> Result<Self, RecordError> {
        if record.cell_type != LPPROGRAM_CELL_TYPE {
            return Err(RecordError::WrongCellType {
                found: record.cell_type,
            });
        }
        let state = CellState {
            prompt_number: record.prompt_number,
            output_area: OutputArea::from_json(record.outputs),
            ..Default::default()
        };
        Ok(LpProgramCell {
            input: record.input,
            collapsed: record.collapsed,
            metadata: record.metadata,
            state: Arc::new(StdMutex::new(state)),
        })
    }

    /// Run the notebook's program with this cell receiving the results.
    ///
    /// Clears the outputs and marks the prompt as running before submitting.
    /// If submission fails the previous prompt is restored.
    pub fn execute<C, N>(
        &self,
        program: &mut LpProgram<C>,
        notebook: &N,
    ) -> Result<String, CompileError>
    where
        C: ExecutionChannel,
        N: Notebook + ?Sized,
    {
        let previous_prompt = {
            let mut state = self.state();
            state.output_area.clear_output();
            state.running = true;
            state.prompt_number.replace(PromptNumber::running())
        };

        match program.compile(notebook, Callbacks::for_cell(self)) {
            Ok(msg_id) => Ok(msg_id),
            Err(e) => {
                let mut state = self.state();
                state.running = false;
                state.prompt_number = previous_prompt;
                Err(e)
            }
        }
    }
}

impl CellVariant for LpProgramCell {
    fn cell_type(&self) -> &str {
        LPPROGRAM_CELL_TYPE
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self.to_record()).unwrap_or(Value::Null)
    }

    fn from_json(value: Value) -> Result<Self, RecordError> {
        let record: LpProgramCellRecord = serde_json::from_value(value)?;
        Self::from_record(record)
    }
}

impl Callbacks {
    /// Callbacks that write results into `cell`'s prompt and output area.
    pub fn for_cell(cell: &LpProgramCell) -> Self {
        let reply_state = cell.state.clone();
        let output_state = cell.state.clone();
        let clear_state = cell.state.clone();
        let next_input_state = cell.state.clone();

        Callbacks::new()
            .on_execute_reply(move |execution_count, ok| {
                debug!("execute_reply: count={} ok={}", execution_count, ok);
                let mut state = reply_state.lock().unwrap_or_else(PoisonError::into_inner);
                state.prompt_number = Some(PromptNumber::Count(execution_count as u64));
                state.running = false;
            })
            .on_output(move |output| {
                let mut state = output_state.lock().unwrap_or_else(PoisonError::into_inner);
                state.output_area.handle_output(output);
            })
            .on_clear_output(move |wait| {
                let mut state = clear_state.lock().unwrap_or_else(PoisonError::into_inner);
                state.output_area.handle_clear_output(wait);
            })
            .on_set_next_input(move |text, replace| {
                let mut state = next_input_state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                state.next_input = Some(NextInput { text, replace });
            })
    }
}

/// Any non-program cell, kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCell {
    cell_type: String,
    value: Value,
}

impl CellVariant for RawCell {
    fn cell_type(&self) -> &str {
        &self.cell_type
    }

    fn to_json(&self) -> Value {
        self.value.clone()
    }

    fn from_json(value: Value) -> Result<Self, RecordError> {
        let cell_type = value
            .get("cell_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(RawCell { cell_type, value })
    }
}

/// A cell as stored in a notebook.
#[derive(Debug)]
pub enum NotebookCell {
    LpProgram(LpProgramCell),
    Other(RawCell),
}

impl NotebookCell {
    pub fn as_lpprogram(&self) -> Option<&LpProgramCell> {
        match self {
            NotebookCell::LpProgram(cell) => Some(cell),
            NotebookCell::Other(_) => None,
        }
    }

    pub fn as_lpprogram_mut(&mut self) -> Option<&mut LpProgramCell> {
        match self {
            NotebookCell::LpProgram(cell) => Some(cell),
            NotebookCell::Other(_) => None,
        }
    }
}

impl From<LpProgramCell> for NotebookCell {
    fn from(cell: LpProgramCell) -> Self {
        NotebookCell::LpProgram(cell)
    }
}

impl CellVariant for NotebookCell {
    fn cell_type(&self) -> &str {
        match self {
            NotebookCell::LpProgram(cell) => cell.cell_type(),
            NotebookCell::Other(cell) => cell.cell_type(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            NotebookCell::LpProgram(cell) => cell.to_json(),
            NotebookCell::Other(cell) => cell.to_json(),
        }
    }

    fn from_json(value: Value) -> Result<Self, RecordError> {
        if value.get("cell_type").and_then(Value::as_str) == Some(LPPROGRAM_CELL_TYPE) {
            LpProgramCell::from_json(value).map(NotebookCell::LpProgram)
        } else {
            RawCell::from_json(value).map(NotebookCell::Other)
        }
    }
}

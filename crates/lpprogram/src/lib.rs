//! Program cells for Jupyter notebooks.
//!
//! A notebook may contain any number of `lpprogram` cells. Together they form
//! one module: [`program::LpProgram`] gathers their text in notebook order,
//! names the module after the notebook title ([`module_name::sanitize`]) and
//! submits the result to an [`channel::ExecutionChannel`], usually a running
//! Jupyter kernel ([`kernel::KernelChannel`]). Results are written back into
//! the cell that triggered the run.

pub mod cell;
pub mod channel;
pub mod error;
pub mod kernel;
pub mod module_name;
pub mod notebook;
pub mod output_area;
pub mod program;
pub mod settings;

pub use cell::{CellVariant, LpProgramCell, NotebookCell, PromptNumber};
pub use channel::{Callbacks, ExecuteOptions, ExecutionChannel, ExecutionEvent};
pub use error::{ChannelError, CompileError, RecordError};
pub use kernel::KernelChannel;
pub use module_name::{sanitize, ModuleName};
pub use notebook::{Notebook, NotebookDocument};
pub use program::{CompiledSource, LpProgram};

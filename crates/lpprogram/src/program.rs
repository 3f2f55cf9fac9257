//! Gathers every program cell of a notebook into one module and submits it.
//!
//! The generated text has this shape:
//!
//! ```text
//! sig <name>.
//! <cell 1>
//! <cell 2>
//! end
//! module <name>.
//! <cell 1>
//! <cell 2>
//! end
//! ```
//!
//! The same body is emitted twice, once as the interface and once as the
//! implementation; the kernel's toolchain compiles both.

use log::{debug, info};

use crate::channel::{Callbacks, ExecuteOptions, ExecutionChannel};
use crate::error::CompileError;
use crate::module_name::ModuleName;
use crate::notebook::Notebook;

/// Closes the body of a generated module.
pub const MODULE_TRAILER: &str = "end";

/// Program text built for one compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSource {
    body: String,
    text: String,
}

impl CompiledSource {
    /// Build the program for `module` from cell bodies in notebook order.
    pub fn build<'a>(module: &ModuleName, cells: impl IntoIterator<Item = &'a str>) -> Self {
        let mut body = format!("{module}.\n");
        for text in cells {
            body.push_str(text);
            body.push('\n');
        }
        body.push_str(MODULE_TRAILER);

        let text = format!("sig {body}\nmodule {body}\n");
        CompiledSource { body, text }
    }

    /// Header, cells and trailer, without the `sig`/`module` wrapping.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The full text submitted to the kernel.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// The notebook-wide program. Holds the cached module name and the channel
/// programs are submitted to.
#[derive(Debug)]
pub struct LpProgram<C> {
    channel: Option<C>,
    module_name: Option<ModuleName>,
}

impl<C: ExecutionChannel> LpProgram<C> {
    /// Create a program for `notebook`. The channel may be attached later.
    pub fn new<N: Notebook + ?Sized>(notebook: &N, channel: Option<C>) -> Self {
        let mut program = LpProgram {
            channel,
            module_name: None,
        };
        program.update_module_name(notebook);
        program
    }

    /// Recompute the module name from the notebook title, e.g. after a rename.
    pub fn update_module_name<N: Notebook + ?Sized>(&mut self, notebook: &N) {
        self.module_name = ModuleName::from_title(notebook.notebook_name()).ok();
        match &self.module_name {
            Some(name) => info!("module name: {}", name),
            None => info!("module name: <none>, notebook title is empty"),
        }
    }

    pub fn module_name(&self) -> Option<&ModuleName> {
        self.module_name.as_ref()
    }

    pub fn attach_channel(&mut self, channel: C) {
        self.channel = Some(channel);
    }

    pub fn detach_channel(&mut self) -> Option<C> {
        self.channel.take()
    }

    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    /// Assemble the program text from the notebook's program cells.
    pub fn build_source<N: Notebook + ?Sized>(
        &self,
        notebook: &N,
    ) -> Result<CompiledSource, CompileError> {
        let module = self.module_name.as_ref().ok_or(CompileError::EmptyTitle)?;
        let cells = notebook.lpprogram_cells();
        Ok(CompiledSource::build(module, cells.iter().map(|cell| cell.text())))
    }

    /// Build the program and submit it. Returns the request's message id;
    /// results are delivered to `callbacks`.
    pub fn compile<N: Notebook + ?Sized>(
        &mut self,
        notebook: &N,
        callbacks: Callbacks,
    ) -> Result<String, CompileError> {
        let source = self.build_source(notebook)?;
        let module = self.module_name.as_ref().ok_or(CompileError::EmptyTitle)?;
        let options = ExecuteOptions::program(module);
        let channel = self
            .channel
            .as_mut()
            .ok_or(CompileError::NoExecutionChannel)?;

        debug!("executing\n{}", source.text());
        let msg_id = channel.execute(source.text(), callbacks, &options)?;
        info!("Submitted program {}: msg_id={}", options.module, msg_id);
        Ok(msg_id)
    }
}

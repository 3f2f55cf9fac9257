//! The execution channel seam and the typed callback table.
//!
//! A compile request is handed to an [`ExecutionChannel`] together with a
//! [`Callbacks`] table. The channel delivers results later, as a sequence of
//! [`ExecutionEvent`]s, each dispatched to the matching handler.

use jupyter_protocol::{JupyterMessage, JupyterMessageContent, Payload, ReplyStatus};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ChannelError;
use crate::module_name::ModuleName;

/// Value of the `input` metadata field for aggregated program requests.
pub const PROGRAM_INPUT: &str = "program";

/// Metadata record attached to every program execution request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteOptions {
    pub input: String,
    pub module: String,
    pub silent: bool,
}

impl ExecuteOptions {
    pub fn program(module: &ModuleName) -> Self {
        Self {
            input: PROGRAM_INPUT.to_string(),
            module: module.as_str().to_string(),
            silent: false,
        }
    }

    pub fn to_metadata(&self) -> Value {
        json!({
            "input": self.input,
            "module": self.module,
            "silent": self.silent,
        })
    }
}

/// A result delivered by the kernel for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// The shell reply that ends a request
    ExecuteReply { execution_count: usize, ok: bool },
    /// An nbformat output record (stream, display_data, execute_result, error)
    Output(Value),
    /// Clear the cell's outputs, possibly deferred until the next output
    ClearOutput { wait: bool },
    /// Replace or insert the text of the next input cell
    SetNextInput { text: String, replace: bool },
}

impl ExecutionEvent {
    /// Translate a kernel message into the events the callbacks care about.
    ///
    /// Payloads of an `execute_reply` come before the reply itself.
    pub fn from_message(message: &JupyterMessage) -> Vec<ExecutionEvent> {
        match &message.content {
            JupyterMessageContent::ExecuteReply(reply) => {
                let mut events: Vec<ExecutionEvent> = reply
                    .payload
                    .iter()
                    .filter_map(|payload| match payload {
                        Payload::SetNextInput { text, replace } => {
                            Some(ExecutionEvent::SetNextInput {
                                text: text.clone(),
                                replace: *replace,
                            })
                        }
                        _ => None,
                    })
                    .collect();
                events.push(ExecutionEvent::ExecuteReply {
                    execution_count: reply.execution_count.0 as usize,
                    ok: reply.status == ReplyStatus::Ok,
                });
                events
            }
            JupyterMessageContent::ClearOutput(clear) => {
                vec![ExecutionEvent::ClearOutput { wait: clear.wait }]
            }
            content => message_content_to_nbformat(content)
                .map(ExecutionEvent::Output)
                .into_iter()
                .collect(),
        }
    }
}

/// Convert an iopub output message to the nbformat JSON stored in a cell.
///
/// jupyter_protocol serializes as: `{"ExecuteResult": {"data": {...}, ...}}`
/// nbformat expects: `{"output_type": "execute_result", "data": {...}, ...}`
pub fn message_content_to_nbformat(content: &JupyterMessageContent) -> Option<Value> {
    match content {
        JupyterMessageContent::StreamContent(stream) => {
            let name = match stream.name {
                jupyter_protocol::Stdio::Stdout => "stdout",
                jupyter_protocol::Stdio::Stderr => "stderr",
            };
            Some(json!({
                "output_type": "stream",
                "name": name,
                "text": stream.text
            }))
        }
        JupyterMessageContent::DisplayData(data) => {
            let mut output = json!({
                "output_type": "display_data",
                "data": data.data,
                "metadata": data.metadata
            });
            // Later update_display_data messages target this id
            if let Some(ref transient) = data.transient {
                if let Some(ref display_id) = transient.display_id {
                    output["transient"] = json!({ "display_id": display_id });
                }
            }
            Some(output)
        }
        JupyterMessageContent::ExecuteResult(result) => Some(json!({
            "output_type": "execute_result",
            "data": result.data,
            "metadata": result.metadata,
            "execution_count": result.execution_count.0
        })),
        JupyterMessageContent::ErrorOutput(error) => Some(json!({
            "output_type": "error",
            "ename": error.ename,
            "evalue": error.evalue,
            "traceback": error.traceback
        })),
        _ => None,
    }
}

type ReplyHandler = Box<dyn FnMut(usize, bool) + Send>;
type OutputHandler = Box<dyn FnMut(Value) + Send>;
type ClearHandler = Box<dyn FnMut(bool) + Send>;
type NextInputHandler = Box<dyn FnMut(String, bool) + Send>;

/// Handlers for the four kinds of results a request can produce.
///
/// Unregistered kinds are dropped.
#[derive(Default)]
pub struct Callbacks {
    execute_reply: Option<ReplyHandler>,
    output: Option<OutputHandler>,
    clear_output: Option<ClearHandler>,
    set_next_input: Option<NextInputHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_execute_reply(mut self, handler: impl FnMut(usize, bool) + Send + 'static) -> Self {
        self.execute_reply = Some(Box::new(handler));
        self
    }

    pub fn on_output(mut self, handler: impl FnMut(Value) + Send + 'static) -> Self {
        self.output = Some(Box::new(handler));
        self
    }

    pub fn on_clear_output(mut self, handler: impl FnMut(bool) + Send + 'static) -> Self {
        self.clear_output = Some(Box::new(handler));
        self
    }

    pub fn on_set_next_input(
        mut self,
        handler: impl FnMut(String, bool) + Send + 'static,
    ) -> Self {
        self.set_next_input = Some(Box::new(handler));
        self
    }

    /// Invoke the handler registered for `event`, if any.
    pub fn dispatch(&mut self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::ExecuteReply {
                execution_count,
                ok,
            } => {
                if let Some(handler) = self.execute_reply.as_mut() {
                    handler(execution_count, ok);
                }
            }
            ExecutionEvent::Output(output) => {
                if let Some(handler) = self.output.as_mut() {
                    handler(output);
                }
            }
            ExecutionEvent::ClearOutput { wait } => {
                if let Some(handler) = self.clear_output.as_mut() {
                    handler(wait);
                }
            }
            ExecutionEvent::SetNextInput { text, replace } => {
                if let Some(handler) = self.set_next_input.as_mut() {
                    handler(text, replace);
                }
            }
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("execute_reply", &self.execute_reply.is_some())
            .field("output", &self.output.is_some())
            .field("clear_output", &self.clear_output.is_some())
            .field("set_next_input", &self.set_next_input.is_some())
            .finish()
    }
}

/// A backend that accepts program text and reports results asynchronously.
pub trait ExecutionChannel {
    /// Submit `code` for execution and return the request's message id.
    ///
    /// Returns as soon as the request is queued; `callbacks` receive the
    /// results in whatever order the backend produces them.
    fn execute(
        &mut self,
        code: &str,
        callbacks: Callbacks,
        options: &ExecuteOptions,
    ) -> Result<String, ChannelError>;
}

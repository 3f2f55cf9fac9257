//! A Jupyter kernel as an execution channel.
//!
//! The kernel must already be running; it is reached through its connection
//! file. Requests are queued to a shell writer task, and replies are routed
//! back to each request's callbacks by `parent_header.msg_id`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use jupyter_protocol::{
    ConnectionInfo, ExecuteRequest, ExecutionState, JupyterMessage, JupyterMessageContent,
    KernelInfoRequest, UnknownMessage,
};
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::channel::{Callbacks, ExecuteOptions, ExecutionChannel, ExecutionEvent};
use crate::error::ChannelError;

/// How long to wait for the `kernel_info_reply` handshake.
const KERNEL_INFO_TIMEOUT: Duration = Duration::from_secs(30);

const EXECUTE_REQUEST: &str = "execute_request";

/// Callbacks of one in-flight request.
///
/// The callbacks sit behind their own lock so they run after the registry
/// lock is released; a handler may call back into the registry.
struct PendingRequest {
    callbacks: Arc<StdMutex<Callbacks>>,
    reply_seen: bool,
    idle_seen: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Shared mapping from msg_id to the callbacks of that request.
///
/// A request is dropped once both its `execute_reply` (shell) and its `idle`
/// status (iopub) have been routed; the two sockets do not order them.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    pending: Arc<StdMutex<HashMap<String, PendingRequest>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register callbacks BEFORE the request is sent, so replies can be resolved.
    pub fn register(&self, msg_id: &str, callbacks: Callbacks) {
        self.lock().insert(
            msg_id.to_string(),
            PendingRequest {
                callbacks: Arc::new(StdMutex::new(callbacks)),
                reply_seen: false,
                idle_seen: false,
                waiters: Vec::new(),
            },
        );
    }

    pub fn is_pending(&self, msg_id: &str) -> bool {
        self.lock().contains_key(msg_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves once `msg_id` has finished (immediately if it is not pending).
    pub fn finished(&self, msg_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        match self.lock().get_mut(msg_id) {
            Some(request) => request.waiters.push(tx),
            None => {
                let _ = tx.send(());
            }
        }
        rx
    }

    /// Dispatch a kernel message to the request it answers.
    pub fn route(&self, message: &JupyterMessage) {
        let Some(msg_id) = message.parent_header.as_ref().map(|h| h.msg_id.as_str()) else {
            return;
        };

        let (callbacks, waiters) = {
            let mut pending = self.lock();
            let Some(request) = pending.get_mut(msg_id) else {
                return;
            };

            match &message.content {
                JupyterMessageContent::ExecuteReply(_) => request.reply_seen = true,
                JupyterMessageContent::Status(status) => {
                    if status.execution_state == ExecutionState::Idle {
                        request.idle_seen = true;
                    }
                }
                _ => {}
            }

            let callbacks = request.callbacks.clone();
            let waiters = if request.reply_seen && request.idle_seen {
                debug!("request {} finished", msg_id);
                pending
                    .remove(msg_id)
                    .map(|done| done.waiters)
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            (callbacks, waiters)
        };

        {
            let mut callbacks = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
            for event in ExecutionEvent::from_message(message) {
                callbacks.dispatch(event);
            }
        }

        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Build the `execute_request` for a program.
///
/// `input` and `module` ride in the request content next to the standard
/// fields, where program-aware kernels look for them; the same record is
/// also attached as message metadata.
pub fn execute_message(code: &str, options: &ExecuteOptions) -> JupyterMessage {
    let mut request = ExecuteRequest::new(code.to_string());
    request.silent = options.silent;

    let content = json!({
        "code": request.code,
        "silent": request.silent,
        "store_history": request.store_history,
        "user_expressions": request.user_expressions.unwrap_or_default(),
        "allow_stdin": request.allow_stdin,
        "stop_on_error": request.stop_on_error,
        "input": options.input,
        "module": options.module,
    });

    let mut message = JupyterMessage::new(
        UnknownMessage {
            msg_type: EXECUTE_REQUEST.to_string(),
            content,
        },
        None,
    );
    message.metadata = options.to_metadata();
    message
}

/// Read a kernel connection file.
pub async fn read_connection_info(path: &Path) -> Result<ConnectionInfo> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}

/// Execution channel backed by a running Jupyter kernel.
pub struct KernelChannel {
    session_id: String,
    outgoing: mpsc::UnboundedSender<JupyterMessage>,
    registry: CallbackRegistry,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl KernelChannel {
    /// Connect to the kernel described by `connection_info`.
    ///
    /// Verifies the kernel is alive with a `kernel_info` handshake, then
    /// spawns the iopub reader, shell reader and shell writer tasks.
    pub async fn connect(connection_info: &ConnectionInfo) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let registry = CallbackRegistry::new();

        let mut iopub =
            runtimelib::create_client_iopub_connection(connection_info, "", &session_id).await?;

        let identity = runtimelib::peer_identity_for_session(&session_id)?;
        let mut shell = runtimelib::create_client_shell_connection_with_identity(
            connection_info,
            &session_id,
            identity,
        )
        .await?;

        let request: JupyterMessage = KernelInfoRequest::default().into();
        shell.send(request).await?;

        match tokio::time::timeout(KERNEL_INFO_TIMEOUT, shell.read()).await {
            Ok(Ok(msg)) => {
                info!("Kernel alive: got {} reply", msg.header.msg_type);
            }
            Ok(Err(e)) => {
                error!("Error reading kernel_info_reply: {}", e);
                return Err(anyhow::anyhow!("Kernel did not respond: {}", e));
            }
            Err(_) => {
                error!("Timeout waiting for kernel_info_reply");
                return Err(anyhow::anyhow!(
                    "Kernel did not respond within {}s",
                    KERNEL_INFO_TIMEOUT.as_secs()
                ));
            }
        }

        let (mut shell_writer, mut shell_reader) = shell.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<JupyterMessage>();

        let iopub_registry = registry.clone();
        let iopub_task = tokio::spawn(async move {
            loop {
                match iopub.read().await {
                    Ok(message) => {
                        debug!(
                            "iopub: type={} parent_msg_id={:?}",
                            message.header.msg_type,
                            message.parent_header.as_ref().map(|h| &h.msg_id)
                        );
                        iopub_registry.route(&message);
                    }
                    Err(e) => {
                        error!("iopub read error: {}", e);
                        break;
                    }
                }
            }
        });

        let shell_registry = registry.clone();
        let shell_reader_task = tokio::spawn(async move {
            loop {
                match shell_reader.read().await {
                    Ok(message) => {
                        debug!("shell reply: type={}", message.header.msg_type);
                        shell_registry.route(&message);
                    }
                    Err(e) => {
                        error!("shell read error: {}", e);
                        break;
                    }
                }
            }
        });

        let shell_writer_task = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let msg_id = message.header.msg_id.clone();
                if let Err(e) = shell_writer.send(message).await {
                    error!("Failed to send {}: {}", msg_id, e);
                    break;
                }
                debug!("Sent execute_request: msg_id={}", msg_id);
            }
        });

        Ok(KernelChannel {
            session_id,
            outgoing,
            registry,
            tasks: vec![iopub_task, shell_reader_task, shell_writer_task],
        })
    }

    /// Connect using a connection file on disk.
    pub async fn connect_file(path: &Path) -> Result<Self> {
        let connection_info = read_connection_info(path).await?;
        info!("Connecting to kernel at {:?}", path);
        Self::connect(&connection_info).await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Resolves once the request has produced both its reply and idle status.
    pub fn finished(&self, msg_id: &str) -> oneshot::Receiver<()> {
        self.registry.finished(msg_id)
    }

    /// Stop routing. Pending callbacks are dropped without being invoked.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let pending = self.registry.len();
        if pending > 0 {
            warn!("Closing kernel channel with {} pending requests", pending);
        }
        self.registry.clear();
    }
}

impl Drop for KernelChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl ExecutionChannel for KernelChannel {
    fn execute(
        &mut self,
        code: &str,
        callbacks: Callbacks,
        options: &ExecuteOptions,
    ) -> Result<String, ChannelError> {
        let message = execute_message(code, options);
        let msg_id = message.header.msg_id.clone();

        self.registry.register(&msg_id, callbacks);
        if self.outgoing.send(message).is_err() {
            self.registry.lock().remove(&msg_id);
            return Err(ChannelError::Closed);
        }
        Ok(msg_id)
    }
}

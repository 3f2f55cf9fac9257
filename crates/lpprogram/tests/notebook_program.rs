//! End-to-end tests: load a notebook, run its program through a scripted
//! channel, and persist the results.

use lpprogram::{
    Callbacks, ChannelError, CompileError, ExecuteOptions, ExecutionChannel, ExecutionEvent,
    LpProgram, Notebook, NotebookDocument, PromptNumber,
};
use serde_json::json;

/// Replies to every request with a fixed list of events, delivered as soon as
/// the request is submitted.
struct ScriptedChannel {
    script: Vec<ExecutionEvent>,
    submitted: Vec<String>,
}

impl ScriptedChannel {
    fn new(script: Vec<ExecutionEvent>) -> Self {
        Self {
            script,
            submitted: Vec::new(),
        }
    }
}

impl ExecutionChannel for ScriptedChannel {
    fn execute(
        &mut self,
        code: &str,
        mut callbacks: Callbacks,
        _options: &ExecuteOptions,
    ) -> Result<String, ChannelError> {
        self.submitted.push(code.to_string());
        for event in self.script.clone() {
            callbacks.dispatch(event);
        }
        Ok(format!("request-{}", self.submitted.len()))
    }
}

struct ClosedChannel;

impl ExecutionChannel for ClosedChannel {
    fn execute(
        &mut self,
        _code: &str,
        _callbacks: Callbacks,
        _options: &ExecuteOptions,
    ) -> Result<String, ChannelError> {
        Err(ChannelError::Closed)
    }
}

fn family_notebook() -> serde_json::Value {
    json!({
        "metadata": {"name": "Family Tree"},
        "nbformat": 3,
        "nbformat_minor": 0,
        "worksheets": [{
            "metadata": {},
            "cells": [
                {"cell_type": "lpprogram", "input": "parent(tom, bob).", "outputs": [], "collapsed": false, "language": "prolog", "metadata": {}},
                {"cell_type": "markdown", "source": "Rules follow.", "metadata": {}},
                {"cell_type": "lpprogram", "input": "grandparent(X, Z) :- parent(X, Y), parent(Y, Z).", "prompt_number": 1, "outputs": [{"output_type": "stream", "name": "stdout", "text": "stale\n"}], "collapsed": false, "language": "prolog", "metadata": {}}
            ]
        }]
    })
}

#[test]
fn test_run_program_from_last_cell() {
    let notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    let channel = ScriptedChannel::new(vec![
        ExecutionEvent::Output(json!({"output_type": "stream", "name": "stdout", "text": "compiled family_Tree\n"})),
        ExecutionEvent::ExecuteReply {
            execution_count: 2,
            ok: true,
        },
    ]);
    let mut program = LpProgram::new(&notebook, Some(channel));

    let target = notebook.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    let msg_id = target.execute(&mut program, &notebook).unwrap();
    assert_eq!(msg_id, "request-1");

    let submitted = &program.channel().unwrap().submitted;
    let body = "family_Tree.\nparent(tom, bob).\ngrandparent(X, Z) :- parent(X, Y), parent(Y, Z).\nend";
    assert_eq!(submitted[0], format!("sig {body}\nmodule {body}\n"));

    assert_eq!(target.prompt_number(), Some(PromptNumber::Count(2)));
    assert!(!target.is_running());
    assert_eq!(
        target.outputs(),
        vec![json!({"output_type": "stream", "name": "stdout", "text": "compiled family_Tree\n"})]
    );

    let first = notebook.cell(0).and_then(|c| c.as_lpprogram()).unwrap();
    assert_eq!(first.prompt_number(), None);
}

#[test]
fn test_results_survive_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("family.ipynb");

    let notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    let channel = ScriptedChannel::new(vec![
        ExecutionEvent::ClearOutput { wait: true },
        ExecutionEvent::Output(json!({"output_type": "error", "ename": "TypeError", "evalue": "bad arity", "traceback": []})),
        ExecutionEvent::ExecuteReply {
            execution_count: 3,
            ok: false,
        },
    ]);
    let mut program = LpProgram::new(&notebook, Some(channel));
    let target = notebook.cell(0).and_then(|c| c.as_lpprogram()).unwrap();
    target.execute(&mut program, &notebook).unwrap();
    notebook.save(&path).unwrap();

    let reloaded = NotebookDocument::load(&path).unwrap();
    let cell = reloaded.cell(0).and_then(|c| c.as_lpprogram()).unwrap();
    assert_eq!(cell.text(), "parent(tom, bob).");
    assert_eq!(cell.prompt_number(), Some(PromptNumber::Count(3)));
    assert_eq!(cell.outputs().len(), 1);
    assert_eq!(cell.outputs()[0]["ename"], "TypeError");

    let untouched = reloaded.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    assert_eq!(untouched.prompt_number(), Some(PromptNumber::Count(1)));
    assert_eq!(untouched.outputs()[0]["text"], "stale\n");
}

#[test]
fn test_failed_submission_restores_prompt() {
    let notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    let mut program = LpProgram::new(&notebook, Some(ClosedChannel));

    let target = notebook.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    let err = target.execute(&mut program, &notebook).unwrap_err();
    assert!(matches!(err, CompileError::Channel(ChannelError::Closed)));
    assert_eq!(target.prompt_number(), Some(PromptNumber::Count(1)));
    assert!(!target.is_running());
    assert!(target.outputs().is_empty());
}

#[test]
fn test_rename_then_recompile() {
    let mut notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    let mut program = LpProgram::new(&notebook, Some(ScriptedChannel::new(Vec::new())));

    notebook.set_notebook_name("42 Kin");
    program.update_module_name(&notebook);
    let source = program.build_source(&notebook).unwrap();
    assert!(source.body().starts_with("x_2_Kin.\n"));
}

#[test]
fn test_untitled_notebook_restores_prompt() {
    let mut notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    notebook.set_notebook_name("");
    let mut program = LpProgram::new(&notebook, Some(ScriptedChannel::new(Vec::new())));

    let target = notebook.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    let err = target.execute(&mut program, &notebook).unwrap_err();
    assert!(matches!(err, CompileError::EmptyTitle));
    assert_eq!(target.prompt_number(), Some(PromptNumber::Count(1)));
    assert!(!target.is_running());
    assert!(program.channel().unwrap().submitted.is_empty());
}

#[test]
fn test_missing_channel_restores_prompt() {
    let notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    let mut program = LpProgram::<ScriptedChannel>::new(&notebook, None);

    let target = notebook.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    let err = target.execute(&mut program, &notebook).unwrap_err();
    assert!(matches!(err, CompileError::NoExecutionChannel));
    assert_eq!(target.prompt_number(), Some(PromptNumber::Count(1)));
    assert!(!target.is_running());
}

#[test]
fn test_abandoned_run_saves_without_running_marker() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("family.ipynb");

    let notebook = NotebookDocument::from_json(family_notebook(), "unused").unwrap();
    let channel = ScriptedChannel::new(vec![ExecutionEvent::Output(
        json!({"output_type": "stream", "name": "stdout", "text": ["loading\n", "family_Tree\n"]}),
    )]);
    let mut program = LpProgram::new(&notebook, Some(channel));

    let target = notebook.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    target.execute(&mut program, &notebook).unwrap();
    assert_eq!(target.prompt_number(), Some(PromptNumber::running()));
    assert!(target.abandon_run());
    notebook.save(&path).unwrap();

    let reloaded = NotebookDocument::load(&path).unwrap();
    let cell = reloaded.cell(2).and_then(|c| c.as_lpprogram()).unwrap();
    assert_eq!(cell.prompt_number(), None);
    assert!(!cell.is_running());
    assert_eq!(cell.outputs().len(), 1);
}

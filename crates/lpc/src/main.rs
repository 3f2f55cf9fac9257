//! `lpc`: build and run the program cells of a notebook.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use lpprogram::settings::{load_settings, Settings};
use lpprogram::{sanitize, KernelChannel, LpProgram, Notebook, NotebookDocument, PromptNumber};

#[derive(Parser, Debug)]
#[command(name = "lpc")]
#[command(about = "Compile notebook program cells into one module and run it on a Jupyter kernel")]
struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the module name derived from a notebook title
    Name {
        /// Notebook title
        title: String,
    },
    /// Print the program assembled from a notebook's program cells
    Build {
        /// Path to the notebook
        notebook: PathBuf,
    },
    /// Run a notebook's program on a running kernel
    Run {
        /// Path to the notebook
        notebook: PathBuf,

        /// Kernel connection file (default: from settings)
        #[arg(long)]
        connection_file: Option<PathBuf>,

        /// Index among the program cells of the cell that receives the results
        #[arg(long, default_value = "0")]
        cell: usize,

        /// Seconds to wait for the program to finish (default: from settings)
        #[arg(long)]
        timeout: Option<u64>,

        /// Write prompt numbers and outputs back to the notebook
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        Commands::Name { title } => {
            println!("{}", sanitize(&title));
            Ok(())
        }
        Commands::Build { notebook } => build(&notebook),
        Commands::Run {
            notebook,
            connection_file,
            cell,
            timeout,
            save,
        } => {
            let settings = load_settings();
            run(&notebook, connection_file, cell, timeout, save, &settings).await
        }
    }
}

fn build(path: &Path) -> Result<()> {
    let notebook = NotebookDocument::load(path)
        .with_context(|| format!("Failed to load notebook {}", path.display()))?;
    let program = LpProgram::<KernelChannel>::new(&notebook, None);
    let source = program.build_source(&notebook)?;
    print!("{}", source.text());
    Ok(())
}

async fn run(
    path: &Path,
    connection_file: Option<PathBuf>,
    cell_index: usize,
    timeout: Option<u64>,
    save: bool,
    settings: &Settings,
) -> Result<()> {
    let notebook = NotebookDocument::load(path)
        .with_context(|| format!("Failed to load notebook {}", path.display()))?;

    let connection_file = connection_file
        .or_else(|| settings.connection_file.clone())
        .context("No kernel connection file given (use --connection-file or settings)")?;
    let timeout = Duration::from_secs(timeout.unwrap_or(settings.timeout_secs));

    let cells = notebook.lpprogram_cells();
    let target = *cells.get(cell_index).with_context(|| {
        format!(
            "Notebook has {} program cells, no cell at index {}",
            cells.len(),
            cell_index
        )
    })?;

    let channel = KernelChannel::connect_file(&connection_file).await?;
    let mut program = LpProgram::new(&notebook, Some(channel));

    let msg_id = target.execute(&mut program, &notebook)?;
    let finished = program
        .channel()
        .map(|channel| channel.finished(&msg_id))
        .context("Kernel channel went away")?;

    if tokio::time::timeout(timeout, finished).await.is_err() {
        warn!("Program {} did not finish within {:?}", msg_id, timeout);
        target.abandon_run();
    }

    for output in target.outputs() {
        print_output(&output);
    }
    if let Some(next) = target.take_next_input() {
        println!("Next input: {}", next.text);
    }
    match target.prompt_number() {
        Some(PromptNumber::Count(count)) => info!("Finished as execution {}", count),
        other => warn!("Program did not report completion (prompt: {:?})", other),
    }

    if save {
        notebook.save(path)?;
        info!("Saved {}", path.display());
    }

    Ok(())
}

fn print_output(output: &serde_json::Value) {
    match output.get("output_type").and_then(|t| t.as_str()) {
        Some("stream") => {
            let text = multiline_text(&output["text"]);
            if output["name"] == "stderr" {
                eprint!("{}", text);
            } else {
                print!("{}", text);
            }
        }
        Some("error") => {
            eprintln!(
                "{}: {}",
                output["ename"].as_str().unwrap_or_default(),
                output["evalue"].as_str().unwrap_or_default()
            );
            if let Some(traceback) = output["traceback"].as_array() {
                for line in traceback {
                    eprintln!("{}", line.as_str().unwrap_or_default());
                }
            }
        }
        _ => match &output["data"]["text/plain"] {
            serde_json::Value::Null => println!("{}", output),
            text => println!("{}", multiline_text(text)),
        },
    }
}

/// nbformat stores multiline text either as one string or as a list of lines.
fn multiline_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(lines) => lines.iter().filter_map(|line| line.as_str()).collect(),
        _ => String::new(),
    }
}

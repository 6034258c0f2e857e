//! CLI command execution.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use procstream::process::{spawn, ProcessOptions, ProcessOutput, SpawnedProcess};
use procstream::stream::{ByteSource, ByteSourceExt, ChunkSource, SourceOptions};
use procstream::StreamResult;

use super::args::{Cli, Commands, SourceArgs, Unit};

/// Exit code used when `--timeout-ms` expires, matching coreutils `timeout`.
const TIMEOUT_EXIT: u8 = 124;

/// One line of `--json` output.
#[derive(Debug, Serialize)]
struct LineRecord<'a> {
    stream: &'a str,
    line: &'a str,
    at: DateTime<Utc>,
}

/// Formats lines for the terminal.
struct LinePrinter {
    json: bool,
    filter: Option<Regex>,
}

impl LinePrinter {
    /// Render one output line, or `None` if the filter rejects it.
    fn render(&self, output: &ProcessOutput) -> Result<Option<String>> {
        if let Some(ref filter) = self.filter {
            if !filter.is_match(output.line()) {
                return Ok(None);
            }
        }

        if self.json {
            let record = LineRecord {
                stream: output.stream_name(),
                line: output.line(),
                at: Utc::now(),
            };
            return Ok(Some(serde_json::to_string(&record)?));
        }

        let tag = if output.is_stderr() { "ERR" } else { "OUT" };
        Ok(Some(format!("{tag}: {}", output.line())))
    }

    async fn pump<St>(&self, mut lines: St) -> Result<()>
    where
        St: Stream<Item = StreamResult<ProcessOutput>> + Unpin,
    {
        while let Some(output) = lines.next().await {
            let output = output.context("Failed to read output")?;
            if let Some(rendered) = self.render(&output)? {
                println!("{rendered}");
            }
        }
        Ok(())
    }
}

/// Execute a CLI command.
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Lines {
            json,
            grep,
            stdout_only,
            timeout_ms,
            source,
        } => {
            let filter = grep
                .as_deref()
                .map(Regex::new)
                .transpose()
                .context("Invalid --grep pattern")?;
            let printer = LinePrinter { json, filter };
            let limit = timeout_ms.map(Duration::from_millis);
            print_lines(&printer, &source, stdout_only, limit).await
        }
        Commands::Count { unit, source } => count(unit, &source).await,
    }
}

fn process_options(source: &SourceArgs) -> Result<ProcessOptions> {
    let Some((program, args)) = source.command.split_first() else {
        bail!("A command is required");
    };
    Ok(ProcessOptions::new(program.as_str())
        .args(args.iter().map(String::as_str))
        .buffer_capacity(source.buffer_size))
}

fn stdin_source(source: &SourceArgs) -> ChunkSource<std::io::Stdin> {
    ChunkSource::with_options(
        std::io::stdin(),
        SourceOptions::new()
            .capacity(source.buffer_size)
            .label("stdin"),
    )
}

async fn print_lines(
    printer: &LinePrinter,
    source: &SourceArgs,
    stdout_only: bool,
    limit: Option<Duration>,
) -> Result<ExitCode> {
    if source.command.is_empty() {
        let lines = stdin_source(source).lines().map_ok(ProcessOutput::Stdout);
        printer.pump(lines).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = process_options(source)?;
    if stdout_only {
        options = options.ignore_stderr();
    }
    let mut process = spawn(&options)?;
    let lines = process.output_lines();

    if let Some(limit) = limit {
        if tokio::time::timeout(limit, printer.pump(lines)).await.is_err() {
            warn!(
                program = %options.program,
                pid = process.id(),
                ?limit,
                "timed out, killing"
            );
            process.kill()?;
            process.wait().await?;
            eprintln!("procstream: {} timed out", options.program);
            return Ok(ExitCode::from(TIMEOUT_EXIT));
        }
    } else {
        printer.pump(lines).await?;
    }

    finish(process).await
}

async fn count(unit: Unit, source: &SourceArgs) -> Result<ExitCode> {
    if source.command.is_empty() {
        let total = count_units(stdin_source(source), unit).await?;
        println!("{total}");
        return Ok(ExitCode::SUCCESS);
    }

    let options = process_options(source)?.ignore_stderr();
    let mut process = spawn(&options)?;
    let stdout = process
        .stdout
        .take()
        .context("Process stdout was not captured")?;

    let total = count_units(stdout, unit).await?;
    println!("{total}");
    finish(process).await
}

async fn count_units<S>(source: S, unit: Unit) -> Result<u64>
where
    S: ByteSource + Unpin,
{
    let total = match unit {
        Unit::Scalars => tally(source.scalars()).await,
        Unit::Characters => tally(source.characters()).await,
        Unit::Lines => tally(source.lines()).await,
    };
    total.context("Failed to read input")
}

async fn tally<St, T>(mut items: St) -> StreamResult<u64>
where
    St: Stream<Item = StreamResult<T>> + Unpin,
{
    let mut total = 0;
    while let Some(item) = items.next().await {
        item?;
        total += 1;
    }
    Ok(total)
}

/// Wait for the child and mirror its exit code.
async fn finish(process: SpawnedProcess) -> Result<ExitCode> {
    let status = process.wait().await?;
    debug!(?status, "process exited");
    Ok(status
        .code()
        .map_or(ExitCode::FAILURE, |code| {
            u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
        }))
}

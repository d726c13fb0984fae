//! Runs the external converter command for one job.

use crate::config::Config;
use crate::conversion::framing::ProgressLineCodec;
use crate::conversion::runner::{
    ConversionFailure, ConversionOutput, ConversionRunner, RunHandle, RunnerRecord,
};
use futures::StreamExt;
use mp3ify_common::JobId;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

/// How the converter is invoked and where its results go.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub program: String,
    /// Argument templates; see [`render_args`].
    pub args: Vec<String>,
    /// Parent of the per-job working directories.
    pub work_root: PathBuf,
    /// Where finished artifacts are moved to.
    pub output_dir: PathBuf,
    pub kill_grace: Duration,
    pub stderr_tail_lines: usize,
}

impl ProcessSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.converter.program.clone(),
            args: config.converter.args.clone(),
            work_root: config.storage.work_dir(),
            output_dir: config.storage.output_dir(),
            kill_grace: config.converter.kill_grace(),
            stderr_tail_lines: config.converter.stderr_tail_lines,
        }
    }
}

/// [`ConversionRunner`] backed by a child process.
///
/// Each job gets a fresh working directory under `work_root`. The converter
/// runs there with stdin closed; stdout is framed into progress lines and
/// stderr is kept as a bounded tail for failure reasons. After a clean exit
/// the first file left in the working directory is the result.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    settings: Arc<ProcessSettings>,
}

impl ProcessRunner {
    pub fn new(settings: ProcessSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }
}

impl ConversionRunner for ProcessRunner {
    fn start(&self, job_id: JobId, source: &str, cancel: CancellationToken) -> RunHandle {
        let (tx, handle) = RunHandle::channel();
        let settings = self.settings.clone();
        let source = source.to_string();

        tokio::spawn(async move {
            let work_dir = settings.work_root.join(job_id.to_string());
            let result = run_converter(&settings, job_id, &source, &work_dir, &tx, &cancel).await;

            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id = %job_id, "Failed to remove working directory: {}", e);
                }
            }

            match &result {
                Ok(output) => tracing::debug!(
                    job_id = %job_id,
                    artifact = %output.artifact_path.display(),
                    "Converter finished"
                ),
                Err(e) => tracing::debug!(job_id = %job_id, "Converter failed: {}", e),
            }

            // The engine may already be gone
            let _ = tx.send(RunnerRecord::Finished(result)).await;
        });

        handle
    }
}

/// Substitute `{source}`, `{job_id}` and `{work_dir}` in each argument.
///
/// Substitution is a single pass, so placeholder text inside the source
/// reference itself is left alone.
pub fn render_args(templates: &[String], job_id: JobId, source: &str, work_dir: &Path) -> Vec<String> {
    let job_id = job_id.to_string();
    let work_dir = work_dir.display().to_string();
    let vars = [
        ("{source}", source),
        ("{job_id}", job_id.as_str()),
        ("{work_dir}", work_dir.as_str()),
    ];

    templates
        .iter()
        .map(|template| {
            let mut out = String::with_capacity(template.len());
            let mut rest = template.as_str();
            'scan: while !rest.is_empty() {
                for (key, value) in vars {
                    if let Some(after) = rest.strip_prefix(key) {
                        out.push_str(value);
                        rest = after;
                        continue 'scan;
                    }
                }
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    out.push(c);
                }
                rest = chars.as_str();
            }
            out
        })
        .collect()
}

fn resolve_program(program: &str) -> Result<PathBuf, ConversionFailure> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(program).map_err(|e| ConversionFailure::Launch(format!("{}: {}", program, e)))
}

async fn run_converter(
    settings: &ProcessSettings,
    job_id: JobId,
    source: &str,
    work_dir: &Path,
    tx: &mpsc::Sender<RunnerRecord>,
    cancel: &CancellationToken,
) -> Result<ConversionOutput, ConversionFailure> {
    if cancel.is_cancelled() {
        return Err(ConversionFailure::Cancelled);
    }

    let program = resolve_program(&settings.program)?;

    tokio::fs::create_dir_all(work_dir).await.map_err(|e| {
        ConversionFailure::Launch(format!("cannot create working directory: {}", e))
    })?;

    let args = render_args(&settings.args, job_id, source, work_dir);
    let mut child = Command::new(&program)
        .args(&args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ConversionFailure::Launch(e.to_string()))?;

    tracing::info!(
        job_id = %job_id,
        program = %program.display(),
        pid = child.id(),
        "Started converter"
    );

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConversionFailure::Launch("stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ConversionFailure::Launch("stderr was not captured".to_string()))?;

    let stderr_task = tokio::spawn(collect_stderr_tail(
        stderr,
        job_id,
        settings.stderr_tail_lines,
    ));

    let mut frames = FramedRead::new(stdout, ProgressLineCodec::new());
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate(&mut child, settings.kill_grace, job_id).await;
                stderr_task.abort();
                return Err(ConversionFailure::Cancelled);
            }
            frame = frames.next() => match frame {
                Some(Ok(frame)) => {
                    let redraw = frame.redraw;
                    let mut delivered = tx.send(RunnerRecord::Line(frame.text)).await.is_ok();
                    if delivered && redraw {
                        delivered = tx.send(RunnerRecord::CarriageReturn).await.is_ok();
                    }
                    if !delivered {
                        // Nobody is listening any more
                        terminate(&mut child, settings.kill_grace, job_id).await;
                        stderr_task.abort();
                        return Err(ConversionFailure::Cancelled);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = %job_id, "Error reading converter output: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    let status: ExitStatus = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            terminate(&mut child, settings.kill_grace, job_id).await;
            stderr_task.abort();
            return Err(ConversionFailure::Cancelled);
        }
        status = child.wait() => {
            status.map_err(|e| ConversionFailure::Io(format!("waiting for converter: {}", e)))?
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(ConversionFailure::Exit {
            code: status.code(),
            stderr_tail,
        });
    }

    collect_result(work_dir, &settings.output_dir, job_id).await
}

/// Drain stderr, keeping only the last `limit` lines.
async fn collect_stderr_tail(stderr: ChildStderr, job_id: JobId, limit: usize) -> String {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(limit.min(64));
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(job_id = %job_id, "converter stderr: {}", line);
                if limit == 0 {
                    continue;
                }
                if tail.len() == limit {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                // Typically invalid UTF-8; the tail is best effort
                tracing::debug!(job_id = %job_id, "Stopped reading converter stderr: {}", e);
                break;
            }
        }
    }

    Vec::from(tail).join("\n").trim().to_string()
}

/// Ask the converter to stop, then kill it after `grace`.
async fn terminate(child: &mut Child, grace: Duration, job_id: JobId) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(grace, child.wait()).await.is_ok()
            {
                tracing::debug!(job_id = %job_id, "Converter stopped after SIGTERM");
                return;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::warn!(job_id = %job_id, "Failed to kill converter: {}", e);
    } else {
        tracing::debug!(job_id = %job_id, "Converter killed");
    }
}

/// Move the converter's result out of `work_dir` into `output_dir`.
async fn collect_result(
    work_dir: &Path,
    output_dir: &Path,
    job_id: JobId,
) -> Result<ConversionOutput, ConversionFailure> {
    let malformed = ConversionFailure::MalformedResult;

    let mut entries = tokio::fs::read_dir(work_dir)
        .await
        .map_err(|e| malformed(format!("cannot read working directory: {}", e)))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| malformed(format!("cannot read working directory: {}", e)))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }
    files.sort();

    let Some(result) = files.into_iter().next() else {
        return Err(malformed("no output file".to_string()));
    };

    let display_name = result
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| malformed(format!("unnamed output file {:?}", result)))?;

    let file_name = match result.extension() {
        Some(ext) => format!("{}.{}", job_id, ext.to_string_lossy()),
        None => job_id.to_string(),
    };

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| ConversionFailure::Io(format!("cannot create output directory: {}", e)))?;

    let artifact_path = output_dir.join(file_name);
    move_file(&result, &artifact_path)
        .await
        .map_err(|e| ConversionFailure::Io(format!("cannot store output file: {}", e)))?;

    Ok(ConversionOutput {
        artifact_path,
        display_name,
    })
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Different filesystems
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

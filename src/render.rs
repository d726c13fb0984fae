//! Rendering of a job's output as a list of lines.

use crate::events::OutputEvent;
use mp3ify_common::JobState;

/// What the next output line does to the rendered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineMode {
    #[default]
    Append,
    /// Set by a carriage return: the next line overwrites the last one.
    Replace,
}

/// Turns a job's event stream into the lines a terminal or page would show.
///
/// ```
/// use mp3ify::events::OutputEvent;
/// use mp3ify::render::ProgressRenderer;
///
/// let mut renderer = ProgressRenderer::new();
/// renderer.apply(&OutputEvent::OutputLine("encoding 10%".into()));
/// renderer.apply(&OutputEvent::CarriageReturn);
/// renderer.apply(&OutputEvent::OutputLine("encoding 99%".into()));
/// assert_eq!(renderer.lines(), ["encoding 99%"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProgressRenderer {
    lines: Vec<String>,
    mode: LineMode,
    status: Option<JobState>,
}

/// How an applied event changed the rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderChange {
    Appended,
    Replaced,
    Status(JobState),
    None,
}

impl ProgressRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &OutputEvent) -> RenderChange {
        match event {
            OutputEvent::StatusChanged(state) => {
                self.status = Some(*state);
                RenderChange::Status(*state)
            }
            OutputEvent::CarriageReturn => {
                self.mode = LineMode::Replace;
                RenderChange::None
            }
            OutputEvent::OutputLine(text) => {
                let mode = std::mem::take(&mut self.mode);
                match (mode, self.lines.last_mut()) {
                    (LineMode::Replace, Some(last)) => {
                        *last = text.clone();
                        RenderChange::Replaced
                    }
                    _ => {
                        self.lines.push(text.clone());
                        RenderChange::Appended
                    }
                }
            }
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    pub fn mode(&self) -> LineMode {
        self.mode
    }

    /// Most recent status seen.
    pub fn status(&self) -> Option<JobState> {
        self.status
    }
}

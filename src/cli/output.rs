//! Terminal output for release runs.
//!
//! Step progress, pauses and failures each get a colored marker; JSON
//! reports go to stdout untouched so they can be piped.

use std::io::Write;
use termcolor::{Buffer, BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

/// Kind of line being printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    /// Step finished or run completed
    Done,
    /// Paused run or questionable state
    Attention,
    /// Step or command failure (stderr)
    Failure,
    /// Detail shown with `--verbose`
    Detail,
    /// Step started or waiting
    Activity,
}

impl Tone {
    fn marker(self) -> &'static str {
        match self {
            Tone::Done => "✓",
            Tone::Attention => "⚠",
            Tone::Failure => "✗",
            Tone::Detail => "→",
            Tone::Activity => "⋯",
        }
    }

    fn color(self) -> Color {
        match self {
            Tone::Done => Color::Green,
            Tone::Attention => Color::Yellow,
            Tone::Failure => Color::Red,
            Tone::Detail => Color::Blue,
            Tone::Activity => Color::Magenta,
        }
    }

    /// Color of the message text, if it is colored at all
    fn text_color(self) -> Option<Color> {
        match self {
            Tone::Attention | Tone::Failure => Some(self.color()),
            Tone::Detail => Some(Color::White),
            Tone::Done | Tone::Activity => None,
        }
    }

    fn bold_marker(self) -> bool {
        matches!(self, Tone::Done | Tone::Attention | Tone::Failure)
    }
}

fn write_marked(buffer: &mut Buffer, tone: Tone, message: &str) -> std::io::Result<()> {
    buffer.set_color(
        ColorSpec::new()
            .set_fg(Some(tone.color()))
            .set_bold(tone.bold_marker()),
    )?;
    write!(buffer, "{}", tone.marker())?;
    buffer.reset()?;
    if let Some(color) = tone.text_color() {
        buffer.set_color(ColorSpec::new().set_fg(Some(color)))?;
    }
    writeln!(buffer, " {}", message)?;
    buffer.reset()
}

/// Prints run progress honouring `--quiet` and `--verbose`
#[derive(Debug)]
pub struct OutputManager {
    stdout: BufferWriter,
    verbose: bool,
    quiet: bool,
}

impl Clone for OutputManager {
    fn clone(&self) -> Self {
        Self::new(self.verbose, self.quiet)
    }
}

impl OutputManager {
    /// Create a new output manager
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            stdout: BufferWriter::stdout(ColorChoice::Auto),
            verbose,
            quiet,
        }
    }

    fn marked(&self, tone: Tone, message: &str) -> std::io::Result<()> {
        let mut buffer = self.stdout.buffer();
        write_marked(&mut buffer, tone, message)?;
        self.stdout.print(&buffer)
    }

    /// Step done or run completed
    pub fn success(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.marked(Tone::Done, message)
    }

    /// Pause at a checkpoint, dry-run notice, other things the operator should read
    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.marked(Tone::Attention, message)
    }

    /// Failure line on stderr; shown even with `--quiet`
    pub fn error(&self, message: &str) {
        let stderr = BufferWriter::stderr(ColorChoice::Auto);
        let mut buffer = stderr.buffer();
        if write_marked(&mut buffer, Tone::Failure, message).is_err() || stderr.print(&buffer).is_err() {
            // stderr is gone; stdout is the last place the operator may look
            println!("✗ {}", message);
        }
    }

    /// Run internals, only with `--verbose`
    pub fn verbose(&self, message: &str) -> std::io::Result<()> {
        if !self.verbose || self.quiet {
            return Ok(());
        }
        self.marked(Tone::Detail, message)
    }

    /// Step started or waiting on a remote job
    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.marked(Tone::Activity, message)
    }

    /// Heading above a block of per-step lines
    pub fn section(&self, title: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let mut buffer = self.stdout.buffer();
        writeln!(&mut buffer)?;
        buffer.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        writeln!(&mut buffer, "═══ {} ═══", title)?;
        buffer.reset()?;
        self.stdout.print(&buffer)
    }

    /// Indented line, e.g. the command that resumes a paused run
    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        self.println(&format!("    {}", message))
    }

    /// Plain line
    pub fn println(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let mut buffer = self.stdout.buffer();
        writeln!(&mut buffer, "{}", message)?;
        self.stdout.print(&buffer)
    }

    /// Recovery suggestions printed after a failed command
    pub fn suggestions(&self, suggestions: &[String]) -> std::io::Result<()> {
        if suggestions.is_empty() {
            return Ok(());
        }
        self.println("\n💡 Recovery suggestions:")?;
        for suggestion in suggestions {
            self.println(&format!("  • {}", suggestion))?;
        }
        Ok(())
    }

    /// Status or final report as pretty JSON; shown even with `--quiet`
    pub fn json(&self, value: &serde_json::Value) -> std::io::Result<()> {
        let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
        let mut buffer = self.stdout.buffer();
        writeln!(&mut buffer, "{}", rendered)?;
        self.stdout.print(&buffer)
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

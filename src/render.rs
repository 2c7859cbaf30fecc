//! Printing completions to the terminal.
//!
//! A [`Printer`] receives the fragments of one completion in order.  The
//! [`TextPrinter`] writes them verbatim in a color; the [`MarkdownPrinter`]
//! re-renders the accumulated text as styled markdown in place.  Both are
//! driven by [`print_stream`], which also watches the Ctrl-C flag.

use std::io::{self, Stdout, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::style::{Color, ContentStyle};
use crossterm::terminal::{self, Clear, ClearType};
use futures::{Stream, StreamExt};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::markdown;
use crate::observability::MARKDOWN_REDRAWS;
use crate::role::SystemRole;

const DEFAULT_REFRESH: Duration = Duration::from_millis(100);
const DEFAULT_REDRAW_THRESHOLD: usize = 256;
const FALLBACK_WIDTH: u16 = 80;

/// Receives the fragments of one completion.
pub trait Printer: Send {
    /// Print the next fragment.
    fn print_fragment(&mut self, fragment: &str) -> Result<()>;

    /// Called once the completion ended, failed or was interrupted.
    ///
    /// Leaves the terminal with styles reset and the cursor on a fresh line, and
    /// readies the printer for another completion.
    fn finish(&mut self) -> Result<()>;
}

/// The outcome of printing one completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Printed {
    /// Everything the stream produced before it ended or was interrupted.
    pub text: String,

    /// True if Ctrl-C stopped the stream.
    pub interrupted: bool,
}

/// Print a fragment stream until it ends, fails, or `interrupt` is set.
///
/// The stream is not dropped here; the caller owns it.  An observed interrupt
/// is cleared so the next completion starts fresh.
pub async fn print_stream<S>(
    printer: &mut dyn Printer,
    stream: &mut S,
    interrupt: &Interrupt,
) -> Result<Printed>
where
    S: Stream<Item = Result<String>> + Unpin + ?Sized,
{
    let mut text = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = interrupt.wait() => None,
            item = stream.next() => Some(item),
        };
        match next {
            None => {
                interrupt.reset();
                printer.finish()?;
                return Ok(Printed {
                    text,
                    interrupted: true,
                });
            }
            Some(Some(Ok(fragment))) => {
                text.push_str(&fragment);
                if let Err(err) = printer.print_fragment(&fragment) {
                    let _ = printer.finish();
                    return Err(err);
                }
            }
            Some(Some(Err(err))) => {
                let _ = printer.finish();
                return Err(err);
            }
            Some(None) => {
                printer.finish()?;
                return Ok(Printed {
                    text,
                    interrupted: false,
                });
            }
        }
    }
}

/// Map a color name to a terminal color; unknown names print uncolored.
pub fn parse_color(name: &str) -> Option<Color> {
    let color = match name.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
        "black" => Color::Black,
        "red" => Color::Red,
        "dark_red" => Color::DarkRed,
        "green" => Color::Green,
        "dark_green" => Color::DarkGreen,
        "yellow" => Color::Yellow,
        "dark_yellow" => Color::DarkYellow,
        "blue" => Color::Blue,
        "dark_blue" => Color::DarkBlue,
        "magenta" => Color::Magenta,
        "dark_magenta" => Color::DarkMagenta,
        "cyan" => Color::Cyan,
        "dark_cyan" => Color::DarkCyan,
        "white" => Color::White,
        "grey" | "gray" => Color::Grey,
        "dark_grey" | "dark_gray" => Color::DarkGrey,
        _ => return None,
    };
    Some(color)
}

fn io_error(err: io::Error) -> Error {
    Error::io("failed to write to the terminal", err)
}

//////////////////////////////////////////// TextPrinter ///////////////////////////////////////////

/// Writes fragments verbatim in one color.
///
/// When live, fragments appear as they arrive; otherwise the whole completion is
/// written at the end.
pub struct TextPrinter<W: Write + Send = Stdout> {
    out: W,
    color: Option<Color>,
    live: bool,
    buffer: String,
    wrote: bool,
}

impl TextPrinter<Stdout> {
    /// A printer on stdout configured by `DEFAULT_COLOR` and `DISABLE_STREAMING`.
    pub fn stdout(config: &Config) -> Self {
        Self::new(
            io::stdout(),
            parse_color(&config.default_color),
            !config.disable_streaming,
        )
    }
}

impl<W: Write + Send> TextPrinter<W> {
    pub fn new(out: W, color: Option<Color>, live: bool) -> Self {
        Self {
            out,
            color,
            live,
            buffer: String::new(),
            wrote: false,
        }
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn write_styled(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let style = ContentStyle {
            foreground_color: self.color,
            ..ContentStyle::default()
        };
        write!(self.out, "{}", style.apply(text)).map_err(io_error)?;
        self.out.flush().map_err(io_error)?;
        self.wrote = true;
        Ok(())
    }
}

impl<W: Write + Send> Printer for TextPrinter<W> {
    fn print_fragment(&mut self, fragment: &str) -> Result<()> {
        if self.live {
            self.write_styled(fragment)
        } else {
            self.buffer.push_str(fragment);
            Ok(())
        }
    }

    fn finish(&mut self) -> Result<()> {
        let buffer = std::mem::take(&mut self.buffer);
        self.write_styled(&buffer)?;
        if self.wrote {
            writeln!(self.out).map_err(io_error)?;
            self.out.flush().map_err(io_error)?;
        }
        self.wrote = false;
        Ok(())
    }
}

////////////////////////////////////////// MarkdownPrinter /////////////////////////////////////////

/// Re-renders the accumulated completion as markdown, in place.
///
/// A redraw happens when the refresh interval has passed since the last one or
/// when enough new text has arrived.  Each redraw moves the cursor back over the
/// previously drawn rows and clears them before writing the new render.  When
/// not live, nothing is drawn until [`Printer::finish`].
pub struct MarkdownPrinter<W: Write + Send = Stdout> {
    out: W,
    live: bool,
    text: String,
    width: Option<u16>,
    refresh: Duration,
    threshold: usize,
    last_draw: Option<Instant>,
    drawn_len: usize,
    drawn_rows: u16,
    redraws: usize,
}

impl MarkdownPrinter<Stdout> {
    /// A printer on stdout sized to the terminal, live unless `DISABLE_STREAMING`.
    pub fn stdout(config: &Config) -> Self {
        Self::new(io::stdout()).with_live(!config.disable_streaming)
    }
}

impl<W: Write + Send> MarkdownPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            live: true,
            text: String::new(),
            width: None,
            refresh: DEFAULT_REFRESH,
            threshold: DEFAULT_REDRAW_THRESHOLD,
            last_draw: None,
            drawn_len: 0,
            drawn_rows: 0,
            redraws: 0,
        }
    }

    /// Redraw while streaming, or render once at the end.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Render for a fixed width instead of the terminal's.
    pub fn with_width(mut self, width: u16) -> Self {
        self.width = Some(width);
        self
    }

    /// Minimum time between redraws.
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    /// Amount of new text that forces a redraw regardless of time.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Number of in-place redraws performed so far, excluding final renders.
    pub fn redraws(&self) -> usize {
        self.redraws
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn width(&self) -> u16 {
        self.width
            .or_else(|| terminal::size().ok().map(|(columns, _)| columns))
            .filter(|columns| *columns > 0)
            .unwrap_or(FALLBACK_WIDTH)
    }

    fn due(&self) -> bool {
        match self.last_draw {
            None => true,
            Some(at) => {
                at.elapsed() >= self.refresh || self.text.len() - self.drawn_len >= self.threshold
            }
        }
    }

    fn draw(&mut self) -> Result<()> {
        let width = self.width();
        let rendered = markdown::render(&self.text, width);
        if self.drawn_rows > 0 {
            queue!(self.out, MoveToColumn(0)).map_err(io_error)?;
            if self.drawn_rows > 1 {
                queue!(self.out, MoveUp(self.drawn_rows - 1)).map_err(io_error)?;
            }
            queue!(self.out, Clear(ClearType::FromCursorDown)).map_err(io_error)?;
        }
        self.out.write_all(rendered.as_bytes()).map_err(io_error)?;
        self.out.flush().map_err(io_error)?;
        self.drawn_rows = if rendered.is_empty() {
            0
        } else {
            markdown::rows(&rendered, width)
        };
        self.drawn_len = self.text.len();
        self.last_draw = Some(Instant::now());
        Ok(())
    }
}

impl<W: Write + Send> Printer for MarkdownPrinter<W> {
    fn print_fragment(&mut self, fragment: &str) -> Result<()> {
        self.text.push_str(fragment);
        if self.live && self.due() {
            self.draw()?;
            self.redraws += 1;
            MARKDOWN_REDRAWS.click();
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.text.is_empty() {
            self.draw()?;
            writeln!(self.out).map_err(io_error)?;
            self.out.flush().map_err(io_error)?;
        }
        self.text.clear();
        self.last_draw = None;
        self.drawn_len = 0;
        self.drawn_rows = 0;
        Ok(())
    }
}

/////////////////////////////////////////// debug panels ///////////////////////////////////////////

const MIN_PANELS_WIDTH: usize = 36;

/// The system prompt and the user prompt in two boxes side by side.
///
/// The system prompt takes a third of `width` and is titled with the role
/// name.  Both boxes grow to the taller of the two.
pub fn debug_panels(role: &SystemRole, prompt: &str, width: u16) -> String {
    let width = (width as usize).max(MIN_PANELS_WIDTH);
    let left_width = width / 3;
    let right_width = width - left_width;
    let left = boxed(
        &format!("{} · System Prompt", role.name),
        &role.role,
        left_width,
    );
    let right = boxed("User", prompt, right_width);
    let height = left.len().max(right.len());
    let left = stretch(left, left_width, height);
    let right = stretch(right, right_width, height);
    let mut out = String::new();
    for (l, r) in left.iter().zip(&right) {
        out.push_str(l);
        out.push_str(r);
        out.push('\n');
    }
    out
}

/// A box `width` columns wide, without its bottom border.
fn boxed(title: &str, text: &str, width: usize) -> Vec<String> {
    let inner = width - 4;
    let title = clip(title, width - 6);
    let fill = width - 4 - title.width();
    let mut lines = vec![format!(
        "╭{} {title} {}╮",
        "─".repeat(fill / 2),
        "─".repeat(fill - fill / 2)
    )];
    for line in wrap(text, inner) {
        let pad = inner - line.width();
        lines.push(format!("│ {line}{} │", " ".repeat(pad)));
    }
    lines
}

/// Pad a box to `height` rows with blank lines and close it.
fn stretch(mut lines: Vec<String>, width: usize, height: usize) -> Vec<String> {
    while lines.len() < height {
        lines.push(format!("│{}│", " ".repeat(width - 2)));
    }
    lines.push(format!("╰{}╯", "─".repeat(width - 2)));
    lines
}

fn clip(text: &str, max: usize) -> String {
    let mut clipped = String::new();
    let mut columns = 0;
    for c in text.chars() {
        let advance = c.width().unwrap_or(0);
        if columns + advance > max {
            break;
        }
        columns += advance;
        clipped.push(c);
    }
    clipped
}

/// Break `text` into lines at most `width` columns wide, preferring spaces.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split(' ') {
            let word = word.replace('\t', "    ");
            let needed = if line.is_empty() {
                word.width()
            } else {
                line.width() + 1 + word.width()
            };
            if needed <= width {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(&word);
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let mut rest = word.as_str();
            while rest.width() > width {
                let head = clip(rest, width);
                rest = &rest[head.len()..];
                lines.push(head);
            }
            line.push_str(rest);
        }
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::strip_ansi;
    use futures::stream;

    fn fragments(items: &[&str]) -> impl Stream<Item = Result<String>> + Unpin {
        let items: Vec<Result<String>> = items.iter().map(|s| Ok(s.to_string())).collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn text_printer_streams_in_color() {
        let mut printer = TextPrinter::new(Vec::new(), Some(Color::Magenta), true);
        let printed = print_stream(
            &mut printer,
            &mut fragments(&["Hi", " there"]),
            &Interrupt::new(),
        )
        .await
        .unwrap();
        assert_eq!(printed.text, "Hi there");
        assert!(!printed.interrupted);
        let output = String::from_utf8(printer.get_ref().clone()).unwrap();
        assert_eq!(strip_ansi(&output), "Hi there\n");
    }

    #[tokio::test]
    async fn text_printer_buffers_when_not_live() {
        let mut printer = TextPrinter::new(Vec::new(), None, false);
        printer.print_fragment("Hi").unwrap();
        assert!(printer.get_ref().is_empty());
        printer.print_fragment(" there").unwrap();
        printer.finish().unwrap();
        assert_eq!(printer.get_ref().as_slice(), b"Hi there\n");
    }

    #[tokio::test]
    async fn empty_stream_prints_nothing() {
        let mut text = TextPrinter::new(Vec::new(), Some(Color::Red), true);
        let printed = print_stream(&mut text, &mut fragments(&[]), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(printed, Printed::default());
        assert!(text.get_ref().is_empty());

        let mut md = MarkdownPrinter::new(Vec::new()).with_width(80);
        print_stream(&mut md, &mut fragments(&[]), &Interrupt::new())
            .await
            .unwrap();
        assert!(md.get_ref().is_empty());
    }

    #[tokio::test]
    async fn errors_finish_the_line() {
        let mut printer = TextPrinter::new(Vec::new(), None, true);
        let mut failing = stream::iter(vec![
            Ok("partial".to_string()),
            Err(Error::streaming("connection reset", None)),
        ]);
        let err = print_stream(&mut printer, &mut failing, &Interrupt::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(printer.get_ref().as_slice(), b"partial\n");
    }

    #[tokio::test]
    async fn interrupt_stops_pulling() {
        let interrupt = Interrupt::new();
        interrupt.set();
        let mut printer = TextPrinter::new(Vec::new(), None, true);
        let mut endless = stream::pending::<Result<String>>();
        let printed = print_stream(&mut printer, &mut endless, &interrupt)
            .await
            .unwrap();
        assert!(printed.interrupted);
        assert!(!interrupt.is_set());
    }

    #[tokio::test]
    async fn markdown_printer_redraws_in_place() {
        let mut printer = MarkdownPrinter::new(Vec::new())
            .with_width(80)
            .with_refresh(Duration::ZERO);
        printer.print_fragment("# Title\n").unwrap();
        printer.print_fragment("body ").unwrap();
        printer.print_fragment("text").unwrap();
        assert!(printer.redraws() >= 1);
        printer.finish().unwrap();

        let output = String::from_utf8(printer.get_ref().clone()).unwrap();
        // The cursor moved back over earlier renders.
        assert!(output.contains("\x1b[1A") || output.contains("\x1b[J"));
        let final_render = markdown::render("# Title\nbody text", 80);
        assert!(output.ends_with(&format!("{final_render}\n")));
        assert!(strip_ansi(&final_render).starts_with("Title\n\nbody text"));
    }

    #[test]
    fn markdown_printer_not_live_renders_once() {
        let mut printer = MarkdownPrinter::new(Vec::new())
            .with_width(80)
            .with_refresh(Duration::ZERO)
            .with_live(false);
        printer.print_fragment("# Title\n").unwrap();
        printer.print_fragment("body text").unwrap();
        assert_eq!(printer.redraws(), 0);
        assert!(printer.get_ref().is_empty());
        printer.finish().unwrap();

        let output = String::from_utf8(printer.get_ref().clone()).unwrap();
        let final_render = markdown::render("# Title\nbody text", 80);
        assert_eq!(output, format!("{final_render}\n"));
    }

    #[test]
    fn debug_panels_side_by_side() {
        let role = SystemRole {
            name: "Quill".to_string(),
            role: "You are Quill\nAnswer briefly.".to_string(),
        };
        let panels = debug_panels(&role, "hello world python", 90);
        let lines: Vec<&str> = panels.lines().collect();
        assert!(lines[0].starts_with("╭"));
        assert!(lines[0].contains(" Quill · System Prompt "));
        assert!(lines[0].contains(" User "));
        assert!(lines.last().unwrap().starts_with("╰"));
        for line in &lines {
            assert_eq!(line.width(), 90, "{line}");
        }
        assert!(panels.contains("You are Quill"));
        assert!(panels.contains("Answer briefly."));
        assert!(panels.contains("hello world python"));
    }

    #[test]
    fn debug_panels_wrap_long_text() {
        let role = SystemRole {
            name: "Shell Command Generator".to_string(),
            role: "You are Shell Command Generator".to_string(),
        };
        let prompt = "a".repeat(100);
        let panels = debug_panels(&role, &prompt, 40);
        let lines: Vec<&str> = panels.lines().collect();
        for line in &lines {
            assert_eq!(line.width(), 40, "{line}");
        }
        let letters: usize = panels.matches('a').count();
        // Every letter of the prompt survives, plus those in the system prompt.
        assert!(letters >= 100);
    }

    #[test]
    fn color_names() {
        assert_eq!(parse_color("magenta"), Some(Color::Magenta));
        assert_eq!(parse_color("Dark-Red"), Some(Color::DarkRed));
        assert_eq!(parse_color("chartreuse"), None);
    }
}

//! Markdown to ANSI-styled terminal text.

use crossterm::style::{Attribute, Color, ContentStyle};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};
use unicode_width::UnicodeWidthChar;

const CODE_COLOR: Color = Color::Cyan;
const QUOTE_PREFIX: &str = "│ ";
const CODE_INDENT: &str = "    ";
const TAB_STOP: usize = 8;

/// Render markdown as styled text for a terminal `width` columns wide.
///
/// Heading markers are dropped in favor of styling.  The result has no trailing
/// newline.
pub fn render(markdown: &str, width: u16) -> String {
    let mut writer = Writer::new(width.max(1) as usize);
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    for event in Parser::new_ext(markdown, options) {
        writer.event(event);
    }
    writer.finish()
}

/// Terminal rows `text` occupies at `width` columns, after wrapping.
///
/// Counts display columns: tabs advance to the next stop and wide glyphs take
/// two columns, wrapping whole when they do not fit.
pub fn rows(text: &str, width: u16) -> u16 {
    let width = width.max(1) as usize;
    let rows: usize = text.split('\n').map(|line| line_rows(line, width)).sum();
    rows.min(u16::MAX as usize) as u16
}

fn line_rows(line: &str, width: usize) -> usize {
    let mut rows = 1;
    let mut column = 0;
    for c in strip_ansi(line).chars() {
        if c == '\t' {
            column = ((column / TAB_STOP + 1) * TAB_STOP).min(width);
            continue;
        }
        let advance = c.width().unwrap_or(0);
        if advance == 0 {
            continue;
        }
        if column + advance > width {
            rows += 1;
            column = 0;
        }
        column += advance;
    }
    rows
}

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        plain.push(c);
    }
    plain
}

#[derive(Default, Clone, Copy)]
struct Inline {
    bold: bool,
    italic: bool,
    underlined: bool,
    crossed_out: bool,
    code: bool,
}

struct Writer {
    out: String,
    width: usize,
    inline: Inline,
    heading: Option<HeadingLevel>,
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    in_code_block: bool,
    line_start: bool,
    need_blank: bool,
    link: Option<String>,
}

impl Writer {
    fn new(width: usize) -> Self {
        Self {
            out: String::new(),
            width,
            inline: Inline::default(),
            heading: None,
            lists: Vec::new(),
            quote_depth: 0,
            in_code_block: false,
            line_start: true,
            need_blank: false,
            link: None,
        }
    }

    fn finish(mut self) -> String {
        let trimmed = self.out.trim_end_matches('\n').len();
        self.out.truncate(trimmed);
        self.out
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                let saved = self.inline;
                self.inline.code = true;
                self.text(&code);
                self.inline = saved;
            }
            Event::Html(html) => self.text(&html),
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => self.newline(),
            Event::Rule => {
                self.block_start();
                let rule = "─".repeat(self.width);
                self.text(&rule);
                self.block_end();
            }
            Event::TaskListMarker(done) => self.text(if done { "[x] " } else { "[ ] " }),
            Event::FootnoteReference(name) => self.text(&format!("[^{name}]")),
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if self.lists.is_empty() {
                    self.block_start();
                }
            }
            Tag::Heading(level, _, _) => {
                self.block_start();
                self.heading = Some(level);
            }
            Tag::BlockQuote => {
                self.block_start();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.block_start();
                if let CodeBlockKind::Fenced(lang) = kind
                    && !lang.is_empty()
                {
                    let saved = self.inline;
                    self.inline.italic = true;
                    self.text(&lang);
                    self.inline = saved;
                    self.newline();
                }
                self.in_code_block = true;
            }
            Tag::List(start) => {
                if self.lists.is_empty() {
                    self.block_start();
                } else if !self.line_start {
                    self.newline();
                }
                self.lists.push(start);
            }
            Tag::Item => {
                if !self.line_start {
                    self.newline();
                }
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.out.push_str(&self.prefix());
                self.out.push_str(&"  ".repeat(depth));
                self.out.push_str(&marker);
                self.line_start = false;
            }
            Tag::Emphasis => self.inline.italic = true,
            Tag::Strong => self.inline.bold = true,
            Tag::Strikethrough => self.inline.crossed_out = true,
            Tag::Link(_, url, _) => {
                self.inline.underlined = true;
                self.link = Some(url.to_string());
            }
            Tag::Image(_, url, _) => {
                self.text("[image: ");
                self.link = Some(url.to_string());
            }
            Tag::FootnoteDefinition(name) => {
                self.block_start();
                self.text(&format!("[^{name}]: "));
            }
            Tag::Table(_) | Tag::TableHead | Tag::TableRow => {
                if !self.line_start {
                    self.newline();
                }
            }
            Tag::TableCell => self.text("| "),
        }
    }

    fn end(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if self.lists.is_empty() {
                    self.block_end();
                } else {
                    self.newline();
                }
            }
            Tag::Heading(..) => {
                self.heading = None;
                self.block_end();
            }
            Tag::BlockQuote => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.block_end();
            }
            Tag::CodeBlock(_) => {
                self.in_code_block = false;
                self.block_end();
            }
            Tag::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block_end();
                }
            }
            Tag::Item => {
                if !self.line_start {
                    self.newline();
                }
            }
            Tag::Emphasis => self.inline.italic = false,
            Tag::Strong => self.inline.bold = false,
            Tag::Strikethrough => self.inline.crossed_out = false,
            Tag::Link(..) => {
                self.inline.underlined = false;
                if let Some(url) = self.link.take() {
                    let saved = self.inline;
                    self.inline = Inline::default();
                    self.text(&format!(" ({url})"));
                    self.inline = saved;
                }
            }
            Tag::Image(..) => {
                if let Some(url) = self.link.take() {
                    self.text(&format!(" {url}]"));
                }
            }
            Tag::FootnoteDefinition(_) => self.block_end(),
            Tag::Table(_) => self.block_end(),
            Tag::TableHead | Tag::TableRow => {
                self.text("|");
                self.newline();
            }
            Tag::TableCell => self.text(" "),
        }
    }

    fn block_start(&mut self) {
        if !self.line_start {
            self.newline();
        }
        if self.need_blank && !self.out.is_empty() {
            self.out.push_str(self.prefix().trim_end());
            self.out.push('\n');
        }
        self.need_blank = false;
    }

    fn block_end(&mut self) {
        if !self.line_start {
            self.newline();
        }
        self.need_blank = true;
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.line_start = true;
    }

    fn prefix(&self) -> String {
        let mut prefix = QUOTE_PREFIX.repeat(self.quote_depth);
        if self.in_code_block {
            prefix.push_str(CODE_INDENT);
        }
        prefix
    }

    fn style(&self) -> ContentStyle {
        let mut style = ContentStyle::new();
        if self.inline.bold || self.heading.is_some() {
            style.attributes.set(Attribute::Bold);
        }
        if self.heading == Some(HeadingLevel::H1) || self.inline.underlined {
            style.attributes.set(Attribute::Underlined);
        }
        if self.inline.italic || self.quote_depth > 0 {
            style.attributes.set(Attribute::Italic);
        }
        if self.inline.crossed_out {
            style.attributes.set(Attribute::CrossedOut);
        }
        if self.inline.code || self.in_code_block {
            style.foreground_color = Some(CODE_COLOR);
        }
        style
    }

    fn text(&mut self, text: &str) {
        let style = self.style();
        let plain = style.attributes.is_empty() && style.foreground_color.is_none();
        for (index, line) in text.split('\n').enumerate() {
            if index > 0 {
                self.newline();
            }
            if line.is_empty() {
                continue;
            }
            if self.line_start {
                self.out.push_str(&self.prefix());
                self.line_start = false;
            }
            if plain {
                self.out.push_str(line);
            } else {
                self.out.push_str(&style.apply(line).to_string());
            }
        }
    }
}

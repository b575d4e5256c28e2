//! Line-oriented text writer with scoped indentation.

use std::ops::{Deref, DerefMut};

use super::dialect::Formatter;

const INDENT_WIDTH: usize = 4;

#[derive(Debug, Default)]
pub struct SourceWriter {
    out: String,
    depth: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one line at the current depth. Empty lines carry no indentation.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            self.out
                .extend(std::iter::repeat_n(' ', self.depth * INDENT_WIDTH));
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Indent one level until the returned guard drops.
    pub fn indent(&mut self) -> IndentGuard<'_> {
        self.depth += 1;
        IndentGuard { writer: self }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// Restores the writer's depth on drop.
pub struct IndentGuard<'a> {
    writer: &'a mut SourceWriter,
}

impl Deref for IndentGuard<'_> {
    type Target = SourceWriter;

    fn deref(&self) -> &SourceWriter {
        self.writer
    }
}

impl DerefMut for IndentGuard<'_> {
    fn deref_mut(&mut self) -> &mut SourceWriter {
        self.writer
    }
}

impl Drop for IndentGuard<'_> {
    fn drop(&mut self) {
        self.writer.depth -= 1;
    }
}

/// Attribute tokens written either as a block before a declaration or
/// inline before a member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    tokens: Vec<String>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: impl Into<String>) {
        self.tokens.push(token.into());
    }

    pub fn push_if(&mut self, condition: bool, token: &str) {
        if condition {
            self.push(token);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// `[`, one token per line, `]`. Nothing at all when empty.
    pub fn write_block(&self, w: &mut SourceWriter, fmt: &Formatter) {
        let Some((last, rest)) = self.tokens.split_last() else {
            return;
        };
        w.line(fmt.attr_open);
        {
            let mut body = w.indent();
            for token in rest {
                body.line(format!("{},", fmt.attribute_token(token)));
            }
            body.line(fmt.attribute_token(last));
        }
        w.line(fmt.attr_close);
    }

    /// `[a, b] ` with the trailing space, or an empty string.
    pub fn inline(&self, fmt: &Formatter) -> String {
        if self.tokens.is_empty() {
            return String::new();
        }
        let tokens: Vec<_> = self.tokens.iter().map(|t| fmt.attribute_token(t)).collect();
        format!("{}{}{} ", fmt.attr_open, tokens.join(", "), fmt.attr_close)
    }
}

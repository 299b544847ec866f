//! Markdown documents
//!
//! Fenced code blocks are located with the `markdown` crate, named after the
//! nearest heading above them, and can be rewritten in place while every byte
//! outside the rewritten blocks is kept.

use std::ops::Range;

use markdown::mdast::Node;
use markdown::{to_mdast, ParseOptions};

use crate::code::has_code;
use crate::error::Error;

/// Info strings of blocks that are run (an empty one counts too)
pub const SHELL_LANGUAGES: [&str; 6] = ["sh", "bash", "shell", "console", "shell-session", "ott"];

/// A fenced code block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Text of the nearest preceding heading, empty if none
    pub name: String,
    /// First word of the info string
    pub lang: Option<String>,
    /// Content lines, container indentation removed
    pub lines: Vec<String>,
    /// 1-based line of the opening fence
    pub line: usize,
    /// Byte range of the content lines, fences excluded
    content: Range<usize>,
    /// Prefix of the opening fence line, reused for rewritten lines
    prefix: String,
}

impl CodeBlock {
    /// Whether this block is a shell session with at least one command
    pub fn is_runnable(&self) -> bool {
        let lang_ok = match self.lang.as_deref() {
            None => true,
            Some(lang) => SHELL_LANGUAGES.contains(&lang),
        };
        lang_ok && has_code(&self.lines)
    }
}

/// Every fenced code block of `source`, in document order.
pub fn code_blocks(source: &str) -> Result<Vec<CodeBlock>, Error> {
    let root = to_mdast(source, &ParseOptions::gfm()).map_err(|e| Error::parse(e.to_string()))?;
    let mut blocks = Vec::new();
    let mut heading = String::new();
    collect(&root, source, &mut heading, &mut blocks);
    Ok(blocks)
}

fn collect(node: &Node, source: &str, heading: &mut String, blocks: &mut Vec<CodeBlock>) {
    match node {
        Node::Heading(h) => {
            *heading = h.children.iter().map(plain_text).collect::<String>().trim().to_string();
        }
        Node::Code(code) => {
            if let Some(block) = code
                .position
                .as_ref()
                .and_then(|pos| fenced_block(source, pos.start.offset, pos.end.offset, pos.start.line))
            {
                blocks.push(CodeBlock {
                    name: heading.clone(),
                    lang: code.lang.clone().filter(|l| !l.is_empty()),
                    lines: if code.value.is_empty() {
                        Vec::new()
                    } else {
                        code.value.split('\n').map(str::to_string).collect()
                    },
                    ..block
                });
            }
        }
        other => {
            if let Some(children) = other.children() {
                for child in children {
                    collect(child, source, heading, blocks);
                }
            }
        }
    }
}

fn plain_text(node: &Node) -> String {
    match node {
        Node::Text(t) => t.value.clone(),
        Node::InlineCode(c) => c.value.clone(),
        other => other
            .children()
            .map(|children| children.iter().map(plain_text).collect())
            .unwrap_or_default(),
    }
}

/// Locate fences and content of the block spanning `start..end`. Indented
/// (unfenced) blocks are skipped.
fn fenced_block(source: &str, start: usize, end: usize, line: usize) -> Option<CodeBlock> {
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let fence = source[start..].trim_start_matches([' ', '\t']);
    if !(fence.starts_with("```") || fence.starts_with("~~~")) {
        return None;
    }
    let fence_char = fence.as_bytes()[0];
    let fence_pos = start + (source.len() - start - fence.len());

    let content_start = match source[start..end].find('\n') {
        Some(i) => start + i + 1,
        None => end,
    };
    let last_line_start = source[..end].rfind('\n').map_or(0, |i| i + 1).max(content_start);
    let closed = last_line_start < end
        && source[last_line_start..end]
            .trim_start_matches(|c: char| c == ' ' || c == '\t' || c == '>')
            .starts_with(char::from(fence_char));
    let content_end = if closed { last_line_start } else { end };

    let lead = &source[line_start..fence_pos];
    let prefix = if lead.chars().all(|c| c == ' ' || c == '\t' || c == '>') {
        lead.to_string()
    } else {
        " ".repeat(lead.chars().count())
    };

    Some(CodeBlock {
        name: String::new(),
        lang: None,
        lines: Vec::new(),
        line,
        content: content_start..content_end.max(content_start),
        prefix,
    })
}

/// Replace the content of some blocks, leaving the rest of `source` intact.
///
/// `replacements` pairs a block with its new content lines.
pub fn rewrite(source: &str, replacements: &[(&CodeBlock, Vec<String>)]) -> String {
    let mut sorted: Vec<_> = replacements.iter().collect();
    sorted.sort_by_key(|(block, _)| block.content.start);

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (block, lines) in sorted {
        if block.content.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..block.content.start]);
        if block.content.end == source.len() && !source.ends_with('\n') && !source[block.content.clone()].is_empty() {
            // unterminated last block: keep it unterminated
            out.push_str(render_lines(&block.prefix, lines).trim_end_matches('\n'));
        } else {
            out.push_str(&render_lines(&block.prefix, lines));
        }
        cursor = block.content.end;
    }
    out.push_str(&source[cursor..]);
    out
}

fn render_lines(prefix: &str, lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        if line.is_empty() {
            out.push_str(prefix.trim_end());
        } else {
            out.push_str(prefix);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

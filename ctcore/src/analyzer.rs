//! File analyzer (spec §4.1): a single, macro-state-independent pass over a
//! [`FileContent`] that finds directive lines, magic annotations, and the
//! include-guard/`#pragma once` shape of the file. The result depends only
//! on the file's content hash, so it can be cached and reused across every
//! macro-state variant that happens to preprocess the same bytes.

use std::collections::BTreeSet;

use crate::content::FileContent;
use crate::error::Diagnostic;
use crate::lexer::{line_splice_with_map, process_pragma};
use crate::magic::{self, MagicAnnotation};

/// Which preprocessor directive a [`Directive`] line carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `#define`
    Define,
    /// `#undef`
    Undef,
    /// `#include`
    Include,
    /// `#ifdef`
    Ifdef,
    /// `#ifndef`
    Ifndef,
    /// `#if`
    If,
    /// `#elif`
    Elif,
    /// `#else`
    Else,
    /// `#endif`
    Endif,
    /// `#error`
    Error,
    /// `#warning`
    Warning,
    /// `#line`
    Line,
    /// `#pragma`
    Pragma,
    /// Any other `#` line (spec §7: non-fatal, passed through as a diagnostic).
    Unknown(String),
}

/// A single directive line found by the analyzer.
#[derive(Clone, Debug)]
pub struct Directive {
    /// 1-based *physical* source line number (adjacent lines joined by a
    /// trailing backslash each keep their own original line number here,
    /// even though the directive's `rest` was parsed from the spliced text).
    pub line: usize,
    /// Which directive this is.
    pub kind: DirectiveKind,
    /// Everything after the directive keyword, trimmed.
    pub rest: String,
    /// The full logical line, for error context.
    pub raw: String,
}

/// A comment's byte range within its physical source line — "intervals to
/// be ignored by later text lookups". A block comment that never closes on
/// the line it opens contributes a span running to the end of that line;
/// the portion it covers on later physical lines gets its own span as the
/// scan continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentSpan {
    /// 1-based physical source line.
    pub line: usize,
    /// Byte offset of the comment's start within that line.
    pub start: usize,
    /// Byte offset just past the comment's end within that line.
    pub end: usize,
}

/// Output of one analysis pass over a file's content.
#[derive(Clone, Debug, Default)]
pub struct AnalysisResult {
    /// Directive lines, in source order.
    pub directives: Vec<Directive>,
    /// Magic build-flag annotations found in `//` comments, in source order
    /// (not yet deduplicated — that happens when aggregating across a
    /// dependency closure, spec §4.7).
    pub magic: Vec<MagicAnnotation>,
    /// Whether the file contains a `#pragma once`.
    pub pragma_once: bool,
    /// The include-guard macro name, if the file has the canonical
    /// `#ifndef G` / `#define G` ... `#endif` shape wrapping its entire body.
    pub include_guard: Option<String>,
    /// Non-fatal findings from this pass (unterminated comments/strings,
    /// unrecognized directives).
    pub diagnostics: Vec<Diagnostic>,
    /// Byte ranges covered by comments, for tools that need to skip them
    /// without re-running comment detection.
    pub comment_spans: Vec<CommentSpan>,
    /// Macro names this file's conditionals and computed includes inspect —
    /// the syntactic read set, a superset of any one variant's actual
    /// runtime read set since it doesn't short-circuit `&&`/`||`/`?:`.
    pub referenced_macros: BTreeSet<String>,
    /// Macro names this file `#define`s or `#undef`s.
    pub defined_macros: BTreeSet<String>,
}

/// Run the analyzer over a file's content.
#[must_use]
pub fn analyze(content: &FileContent, display_path: &str) -> AnalysisResult {
    let (spliced, line_map) = line_splice_with_map(&content.text);
    let pragma_processed = process_pragma(&spliced);

    let mut result = AnalysisResult::default();

    for (idx, raw_line) in pragma_processed.lines().enumerate() {
        let line_no = line_map.get(idx).copied().unwrap_or(idx + 1);

        result.comment_spans.extend(
            scan_comment_spans(raw_line)
                .into_iter()
                .map(|(start, end)| CommentSpan { line: line_no, start, end }),
        );

        if let Some(comment_body) = find_line_comment(raw_line) {
            if let Some(annotation) = magic::parse_comment_body(comment_body, line_no) {
                result.magic.push(annotation);
            }
        }

        let (_, well_formed) = crate::lexer::strip_comments(raw_line);
        if !well_formed {
            result.diagnostics.push(Diagnostic::new(
                display_path,
                line_no,
                "unterminated-comment-or-string",
                "unterminated comment or string literal; rest of line treated as comment",
            ));
        }

        let Some(directive) = extract_directive(raw_line) else {
            continue;
        };
        let mut parts = directive.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim().to_string();

        let kind = match cmd {
            "define" => DirectiveKind::Define,
            "undef" => DirectiveKind::Undef,
            "include" => DirectiveKind::Include,
            "ifdef" => DirectiveKind::Ifdef,
            "ifndef" => DirectiveKind::Ifndef,
            "if" => DirectiveKind::If,
            "elif" => DirectiveKind::Elif,
            "else" => DirectiveKind::Else,
            "endif" => DirectiveKind::Endif,
            "error" => DirectiveKind::Error,
            "warning" => DirectiveKind::Warning,
            "line" => DirectiveKind::Line,
            "pragma" => DirectiveKind::Pragma,
            other => {
                result.diagnostics.push(Diagnostic::new(
                    display_path,
                    line_no,
                    "unknown-directive",
                    format!("unrecognized directive '#{other}'"),
                ));
                DirectiveKind::Unknown(other.to_string())
            }
        };

        if kind == DirectiveKind::Pragma && rest.trim() == "once" {
            result.pragma_once = true;
        }

        match &kind {
            DirectiveKind::Ifdef | DirectiveKind::Ifndef => {
                if let Some(name) = rest.split_whitespace().next() {
                    result.referenced_macros.insert(name.to_string());
                }
            }
            DirectiveKind::If | DirectiveKind::Elif => {
                result.referenced_macros.extend(referenced_identifiers_in_condition(&rest, display_path, line_no));
            }
            DirectiveKind::Include => {
                if !is_literal_include_target(&rest) {
                    result.referenced_macros.extend(referenced_identifiers_in_text(&rest));
                }
            }
            DirectiveKind::Define | DirectiveKind::Undef => {
                if let Some(name) = macro_name_from_rest(&rest) {
                    result.defined_macros.insert(name.to_string());
                }
            }
            _ => {}
        }

        result.directives.push(Directive {
            line: line_no,
            kind,
            rest,
            raw: raw_line.to_string(),
        });
    }

    result.magic = magic::dedup_first_wins(result.magic);
    result.include_guard = detect_include_guard(&result.directives);
    result
}

/// Whether an `#include` payload is already a literal `"..."`/`<...>`
/// target rather than a computed (macro-expanded) one.
fn is_literal_include_target(rest: &str) -> bool {
    let rest = rest.trim();
    rest.starts_with('"') || rest.starts_with('<')
}

/// Identifiers referenced by a `#if`/`#elif` controlling expression,
/// including `defined(...)` operands. A syntactic superset of any one
/// variant's runtime read set, since short-circuiting isn't evaluated here —
/// the analyzer doesn't have a `MacroState` to evaluate against.
fn referenced_identifiers_in_condition(rest: &str, display_path: &str, line_no: usize) -> Vec<String> {
    let Ok(tokens) = crate::expr::tokenize(rest, display_path, line_no) else {
        return Vec::new();
    };
    tokens
        .into_iter()
        .filter_map(|t| match t {
            crate::token::ExprToken::Identifier(name) if name != "defined" => Some(name),
            _ => None,
        })
        .collect()
}

/// Plain identifier scan over a computed-include payload (no expression
/// grammar involved — just whatever macro names appear in it).
fn referenced_identifiers_in_text(rest: &str) -> Vec<String> {
    crate::lexer::tokenize_line(rest)
        .into_iter()
        .filter_map(|t| match t {
            crate::token::Token::Identifier(name) => Some(name),
            _ => None,
        })
        .collect()
}

/// The macro name a `#define`/`#undef` targets — text up to the first
/// whitespace or `(` (the latter marking a function-like macro's parameter list).
fn macro_name_from_rest(rest: &str) -> Option<&str> {
    let end = rest.find(|c: char| c.is_whitespace() || c == '(').unwrap_or(rest.len());
    let name = &rest[..end];
    if name.is_empty() { None } else { Some(name) }
}

/// Scan a single physical line for comment spans (byte ranges), skipping
/// contents of string/char literals. A block comment that doesn't close on
/// this line runs to the end of it; the caller advances to the next line.
fn scan_comment_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut quote = '\0';
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            in_string = true;
            quote = c;
            i += 1;
            continue;
        }
        if c == '/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            spans.push((i, line.len()));
            break;
        }
        if c == '/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            if let Some(rel_end) = line[i + 2..].find("*/") {
                let end = i + 2 + rel_end + 2;
                spans.push((i, end));
                i = end;
                continue;
            }
            spans.push((i, line.len()));
            break;
        }
        i += 1;
    }
    spans
}

fn extract_directive(line: &str) -> Option<&str> {
    line.trim_start().strip_prefix('#').map(str::trim)
}

/// Find the body of a `//` line comment outside of string/char literals, if any.
fn find_line_comment(line: &str) -> Option<&str> {
    let mut in_string = false;
    let mut quote = '\0';
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = false;
            }
        } else if c == '"' || c == '\'' {
            in_string = true;
            quote = c;
        } else if c == '/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            return Some(&line[i + 2..]);
        }
        i += 1;
    }
    None
}

fn detect_include_guard(directives: &[Directive]) -> Option<String> {
    let first = directives.first()?;
    let second = directives.get(1)?;
    let last = directives.last()?;
    if first.kind != DirectiveKind::Ifndef || last.kind != DirectiveKind::Endif {
        return None;
    }
    let guard = first.rest.split_whitespace().next()?.to_string();
    if second.kind == DirectiveKind::Define
        && second.rest.split_whitespace().next() == Some(guard.as_str())
    {
        Some(guard)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentRegistry;
    use std::path::Path;

    fn analyze_str(src: &str) -> AnalysisResult {
        let mut registry = ContentRegistry::new();
        let content = registry.intern(Path::new("t.h"), src.as_bytes());
        analyze(&content, "t.h")
    }

    #[test]
    fn finds_magic_annotation_in_comment() {
        let result = analyze_str("//#CXXFLAGS=-std=c++20\nint x;\n");
        assert_eq!(result.magic.len(), 1);
    }

    #[test]
    fn detects_canonical_include_guard() {
        let result = analyze_str("#ifndef FOO_H\n#define FOO_H\nint x;\n#endif\n");
        assert_eq!(result.include_guard, Some("FOO_H".to_string()));
    }

    #[test]
    fn detects_pragma_once() {
        let result = analyze_str("#pragma once\nint x;\n");
        assert!(result.pragma_once);
    }

    #[test]
    fn unknown_directive_is_diagnosed_not_fatal() {
        let result = analyze_str("#foobar baz\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].tag, "unknown-directive");
    }

    #[test]
    fn referenced_and_defined_macros_are_populated() {
        let result = analyze_str("#define FOO 1\n#if BAR && defined(BAZ)\n#endif\n#undef QUUX\n");
        assert!(result.defined_macros.contains("FOO"));
        assert!(result.defined_macros.contains("QUUX"));
        assert!(result.referenced_macros.contains("BAR"));
        assert!(result.referenced_macros.contains("BAZ"));
        assert!(!result.referenced_macros.contains("defined"));
    }

    #[test]
    fn directive_after_a_continuation_reports_its_own_physical_line() {
        let result = analyze_str("int x = 1 \\\n    + 2;\n#define Y 1\n");
        assert_eq!(result.directives.len(), 1);
        // "#define Y 1" is physical line 3 even though the continuation
        // collapsed lines 1-2 into a single logical line.
        assert_eq!(result.directives[0].line, 3);
    }

    #[test]
    fn comment_spans_cover_line_and_block_comments() {
        let result = analyze_str("int x; // trailing\n/* block */ int y;\n");
        assert_eq!(result.comment_spans.len(), 2);
        assert_eq!(result.comment_spans[0].line, 1);
        assert_eq!(result.comment_spans[1].line, 2);
    }
}

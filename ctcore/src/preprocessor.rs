//! The simple preprocessor (spec §4.3): walks a file's lines, evaluates
//! conditional-compilation directives against a [`MacroState`], expands
//! macro invocations, and records everything a [`CacheValue`] needs —
//! expanded text, the `#define`/`#undef` delta, the conditional read set,
//! and non-fatal diagnostics.
//!
//! `#include` resolution and recursion are the header-dependency walker's
//! job (spec §4.6); this module processes exactly one file's own text and
//! reports `#include` targets to the caller rather than recursing itself,
//! so a single-file [`preprocess`] call stays a pure function of
//! `(content, analysis, initial_state, config)`.

use std::collections::{BTreeSet, HashSet};

use crate::analyzer::{AnalysisResult, Directive, DirectiveKind};
use crate::cache::{CacheValue, DefineDelta};
use crate::config::{Compiler, EngineConfig, IncludeKind};
use crate::content::FileContent;
use crate::error::{Diagnostic, PreprocessError};
use crate::expr;
use crate::lexer;
use crate::macro_def::{Macro, MacroBody};
use crate::macro_state::{MacroState, MacroValue};
use crate::magic::MagicAnnotation;
use crate::token::Token;

/// An `#include` directive encountered while preprocessing, reported back
/// to the caller (the header-dependency walker) rather than resolved here.
#[derive(Clone, Debug)]
pub struct IncludeRequest {
    /// 1-based line the `#include` appeared on.
    pub line: usize,
    /// The raw target text, already macro-expanded if it was a computed include.
    pub target: String,
    /// Quoted vs angled.
    pub kind: IncludeKind,
}

struct ConditionalFrame {
    parent_active: bool,
    this_branch_active: bool,
    any_branch_taken: bool,
}

impl ConditionalFrame {
    const fn is_active(&self) -> bool {
        self.parent_active && self.this_branch_active
    }
}

struct Driver<'a> {
    state: MacroState,
    disabled_macros: HashSet<String>,
    current_file: &'a str,
    current_line: usize,
    recursion_limit: usize,
    compiler: Compiler,
    warning_handler: Option<&'a dyn Fn(&str)>,
    conditional_stack: Vec<ConditionalFrame>,
    read_set: BTreeSet<String>,
    defines_delta: Vec<DefineDelta>,
    diagnostics: Vec<Diagnostic>,
    includes: Vec<IncludeRequest>,
    active_magic: Vec<MagicAnnotation>,
}

/// Preprocess one file's text against `initial_state`.
///
/// # Errors
/// Returns a [`PreprocessError`] for malformed directives, unbalanced
/// conditionals, macro argument mismatches, or expansion recursion past
/// `config.recursion_limit`.
pub fn preprocess(
    content: &FileContent,
    analysis: &AnalysisResult,
    initial_state: MacroState,
    config: &EngineConfig,
    display_path: &str,
) -> Result<CacheValue, PreprocessError> {
    let (spliced, line_map) = lexer::line_splice_with_map(&content.text);
    let pragma_processed = lexer::process_pragma(&spliced);

    let mut directives_by_line: std::collections::HashMap<usize, &Directive> =
        std::collections::HashMap::new();
    for d in &analysis.directives {
        directives_by_line.insert(d.line, d);
    }

    let mut driver = Driver {
        state: initial_state,
        disabled_macros: HashSet::new(),
        current_file: display_path,
        current_line: 1,
        recursion_limit: config.recursion_limit,
        compiler: config.variant.compiler,
        warning_handler: config.warning_handler.as_deref(),
        conditional_stack: Vec::new(),
        read_set: BTreeSet::new(),
        defines_delta: Vec::new(),
        diagnostics: analysis.diagnostics.clone(),
        includes: Vec::new(),
        active_magic: Vec::new(),
    };

    let mut magic_by_line: std::collections::HashMap<usize, &MagicAnnotation> =
        std::collections::HashMap::new();
    for m in &analysis.magic {
        magic_by_line.insert(m.line, m);
    }

    let mut out_lines: Vec<String> = Vec::with_capacity(pragma_processed.lines().count());

    for (idx, raw_line) in pragma_processed.lines().enumerate() {
        // Directives and magic annotations are keyed by physical source
        // line (spec §4.1): a spliced logical line reports the physical
        // line it started at, not its position in the joined text.
        driver.current_line = line_map.get(idx).copied().unwrap_or(idx + 1);
        // A magic annotation's governing condition is whatever frame was
        // active before this line is processed (spec §4.3: "for each magic
        // token, if the current frame is active, include it in active_magic").
        let was_active = driver.can_emit_line();
        if was_active {
            if let Some(annotation) = magic_by_line.get(&driver.current_line) {
                driver.active_magic.push((*annotation).clone());
            }
        }

        if let Some(directive) = directives_by_line.get(&driver.current_line) {
            if let Some(text) = driver.handle_directive(directive)? {
                out_lines.push(text);
            }
        } else if was_active {
            let tokens = lexer::tokenize_line(raw_line);
            let expanded = driver.expand_tokens(&tokens, 0)?;
            out_lines.push(lexer::tokens_to_string(&expanded));
        }
    }

    if !driver.conditional_stack.is_empty() {
        return Err(PreprocessError::conditional_error(
            driver.current_file.to_string(),
            driver.current_line,
            "unterminated #if/#ifdef/#ifndef".to_string(),
        ));
    }

    Ok(CacheValue {
        expanded_text: out_lines.join("\n"),
        defines_delta: driver.defines_delta,
        diagnostics: driver.diagnostics,
        magic: driver.active_magic,
        read_set: driver.read_set,
        includes: driver
            .includes
            .into_iter()
            .map(|req| (req.line, req.target, req.kind))
            .collect(),
    })
}

impl Driver<'_> {
    fn can_emit_line(&self) -> bool {
        self.conditional_stack.iter().all(ConditionalFrame::is_active)
    }

    fn parent_active(&self) -> bool {
        self.conditional_stack.last().is_none_or(ConditionalFrame::is_active)
    }

    fn directive_error(&self, detail: &str, raw: &str) -> PreprocessError {
        let column = calculate_column(raw, detail);
        PreprocessError::malformed_directive(self.current_file.to_string(), self.current_line, detail.to_string())
            .with_column(column)
            .with_source_line(raw.to_string())
    }

    fn handle_directive(&mut self, directive: &Directive) -> Result<Option<String>, PreprocessError> {
        match &directive.kind {
            DirectiveKind::Define => self.handle_define(&directive.rest, &directive.raw),
            DirectiveKind::Undef => self.handle_undef(&directive.rest, &directive.raw),
            DirectiveKind::Include => {
                self.handle_include(&directive.rest, directive.line, &directive.raw)?;
                Ok(None)
            }
            DirectiveKind::Ifdef => {
                self.handle_ifdef(&directive.rest);
                Ok(None)
            }
            DirectiveKind::Ifndef => {
                self.handle_ifndef(&directive.rest);
                Ok(None)
            }
            DirectiveKind::If => {
                self.handle_if(&directive.rest, &directive.raw)?;
                Ok(None)
            }
            DirectiveKind::Elif => {
                self.handle_elif(&directive.rest, &directive.raw)?;
                Ok(None)
            }
            DirectiveKind::Else => {
                self.handle_else(&directive.raw)?;
                Ok(None)
            }
            DirectiveKind::Endif => {
                self.handle_endif(&directive.raw)?;
                Ok(None)
            }
            DirectiveKind::Error => self.handle_error(&directive.rest, &directive.raw).map(|()| None),
            DirectiveKind::Warning => {
                self.handle_warning(&directive.rest);
                Ok(None)
            }
            DirectiveKind::Line => {
                self.handle_line(&directive.rest);
                Ok(None)
            }
            DirectiveKind::Pragma | DirectiveKind::Unknown(_) => Ok(None),
        }
    }

    fn handle_define(&mut self, rest: &str, raw: &str) -> Result<Option<String>, PreprocessError> {
        if !self.can_emit_line() {
            return Ok(None);
        }
        let rest = rest.trim_start();
        let mut chars = rest.chars().peekable();
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.directive_error("define requires a macro name", raw));
        }

        let mut params: Option<Vec<String>> = None;
        let mut is_variadic = false;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut param = String::new();
            let mut params_vec = Vec::new();
            loop {
                match chars.next() {
                    None => return Err(self.directive_error("unterminated macro parameter list", raw)),
                    Some(')') => {
                        if !param.trim().is_empty() {
                            params_vec.push(param.trim().to_string());
                        }
                        break;
                    }
                    Some(',') => {
                        params_vec.push(param.trim().to_string());
                        param.clear();
                    }
                    Some('.') => {
                        is_variadic = true;
                        if chars.peek() == Some(&'.') {
                            chars.next();
                            if chars.peek() == Some(&'.') {
                                chars.next();
                            }
                        }
                    }
                    Some(c) => param.push(c),
                }
            }
            params = Some(params_vec);
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let body_str: String = chars.collect();
        let (stripped, _) = lexer::strip_comments(&body_str);
        let body_tokens = lexer::tokenize_line(stripped.trim());

        let body = match params {
            Some(params) => MacroBody::FunctionLike { params, is_variadic, body: body_tokens },
            None => MacroBody::ObjectLike(body_tokens),
        };
        let macro_def = Macro::defined_at(name.clone(), body, self.current_file.to_string(), self.current_line);
        self.defines_delta.push(DefineDelta::Define(macro_def.clone()));
        self.state.define(name, macro_def);
        Ok(None)
    }

    fn handle_undef(&mut self, rest: &str, raw: &str) -> Result<Option<String>, PreprocessError> {
        if !self.can_emit_line() {
            return Ok(None);
        }
        let name = rest.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err(self.directive_error("undef requires a macro name", raw));
        }
        self.state.undef(name);
        self.defines_delta.push(DefineDelta::Undef(name.to_string()));
        Ok(None)
    }

    fn handle_include(&mut self, rest: &str, line: usize, raw: &str) -> Result<(), PreprocessError> {
        if !self.can_emit_line() {
            return Ok(());
        }
        let trimmed = rest.trim();
        let (target, kind) = if let Some(inner) = trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            (inner.to_string(), IncludeKind::Local)
        } else if let Some(inner) = trimmed.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            (inner.to_string(), IncludeKind::System)
        } else {
            // Computed include: macro-expand the payload and re-derive quoting.
            let tokens = lexer::tokenize_line(trimmed);
            let expanded = self.expand_tokens(&tokens, 0)?;
            let expanded_str = lexer::tokens_to_string(&expanded);
            let expanded_trimmed = expanded_str.trim();
            if let Some(inner) = expanded_trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                (inner.to_string(), IncludeKind::Local)
            } else if let Some(inner) = expanded_trimmed.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                (inner.to_string(), IncludeKind::System)
            } else {
                self.diagnostics.push(Diagnostic::new(
                    self.current_file.to_string(),
                    line,
                    "empty-computed-include",
                    format!("computed #include expanded to '{expanded_trimmed}', which is not a header name"),
                ));
                return Ok(());
            }
        };

        if target.is_empty() {
            return Err(self.directive_error("include requires \"file\" or <file>", raw));
        }
        self.includes.push(IncludeRequest { line, target, kind });
        Ok(())
    }

    fn handle_ifdef(&mut self, rest: &str) {
        let name = rest.trim();
        let parent_active = self.parent_active();
        let active = if parent_active {
            self.read_set.insert(name.to_string());
            self.state.is_defined(name)
        } else {
            false
        };
        self.conditional_stack.push(ConditionalFrame {
            parent_active,
            this_branch_active: active,
            any_branch_taken: active,
        });
    }

    fn handle_ifndef(&mut self, rest: &str) {
        let name = rest.trim();
        let parent_active = self.parent_active();
        let active = if parent_active {
            self.read_set.insert(name.to_string());
            !self.state.is_defined(name)
        } else {
            false
        };
        self.conditional_stack.push(ConditionalFrame {
            parent_active,
            this_branch_active: active,
            any_branch_taken: active,
        });
    }

    fn handle_if(&mut self, rest: &str, raw: &str) -> Result<(), PreprocessError> {
        let parent_active = self.parent_active();
        let active = if parent_active { self.eval_condition(rest, raw) } else { false };
        self.conditional_stack.push(ConditionalFrame {
            parent_active,
            this_branch_active: active,
            any_branch_taken: active,
        });
        Ok(())
    }

    fn handle_elif(&mut self, rest: &str, raw: &str) -> Result<(), PreprocessError> {
        let Some(frame) = self.conditional_stack.last() else {
            return Err(PreprocessError::conditional_error(
                self.current_file.to_string(),
                self.current_line,
                "#elif without #if".to_string(),
            ));
        };
        let parent_active = frame.parent_active;
        let any_branch_taken = frame.any_branch_taken;
        let active = if parent_active && !any_branch_taken {
            self.eval_condition(rest, raw)
        } else {
            false
        };
        if let Some(frame) = self.conditional_stack.last_mut() {
            frame.this_branch_active = active;
            frame.any_branch_taken = any_branch_taken || active;
        }
        Ok(())
    }

    fn handle_else(&mut self, raw: &str) -> Result<(), PreprocessError> {
        let Some(frame) = self.conditional_stack.last_mut() else {
            return Err(PreprocessError::conditional_error(
                self.current_file.to_string(),
                self.current_line,
                "#else without #if".to_string(),
            ));
        };
        let _ = raw;
        let active = frame.parent_active && !frame.any_branch_taken;
        frame.this_branch_active = active;
        frame.any_branch_taken = frame.any_branch_taken || active;
        Ok(())
    }

    fn handle_endif(&mut self, _raw: &str) -> Result<(), PreprocessError> {
        if self.conditional_stack.pop().is_none() {
            return Err(PreprocessError::conditional_error(
                self.current_file.to_string(),
                self.current_line,
                "#endif without #if".to_string(),
            ));
        }
        Ok(())
    }

    fn handle_error(&mut self, rest: &str, raw: &str) -> Result<(), PreprocessError> {
        if !self.can_emit_line() {
            return Ok(());
        }
        let _ = raw;
        let msg = if rest.is_empty() { "#error directive".to_string() } else { format!("#error: {rest}") };
        Err(PreprocessError::malformed_directive(self.current_file.to_string(), self.current_line, msg))
    }

    fn handle_warning(&mut self, rest: &str) {
        if self.can_emit_line() && matches!(self.compiler, Compiler::GCC | Compiler::Clang) {
            let msg = if rest.is_empty() { "#warning directive".to_string() } else { format!("#warning: {rest}") };
            if let Some(handler) = self.warning_handler {
                handler(&msg);
            }
        }
    }

    fn handle_line(&mut self, rest: &str) {
        if !self.can_emit_line() {
            return;
        }
        let mut parts = rest.split_whitespace();
        if let Some(num) = parts.next().and_then(|s| s.parse::<usize>().ok()) {
            self.current_line = num.saturating_sub(1);
        }
    }

    /// Evaluate a `#if`/`#elif` controlling expression. A malformed
    /// expression is a non-fatal finding (spec §7: "malformed #if
    /// expression... continue conservatively, treat erroneous conditional as
    /// inactive") — it downgrades to a diagnostic and the branch is treated
    /// as not taken, rather than aborting the whole file.
    fn eval_condition(&mut self, rest: &str, raw: &str) -> bool {
        let tokens = lexer::tokenize_line(rest);
        let expanded = match self.expand_tokens(&tokens, 0) {
            Ok(expanded) => expanded,
            Err(err) => {
                self.push_condition_diagnostic(&err, raw);
                return false;
            }
        };
        let expr_text = lexer::tokens_to_string(&expanded);
        let result = expr::tokenize(expr_text.trim(), self.current_file, self.current_line)
            .map_err(|e| attach_context(e, raw))
            .and_then(|expr_tokens| {
                expr::evaluate(&expr_tokens, &self.state, self.current_file, self.current_line)
                    .map_err(|e| attach_context(e, raw))
            });
        match result {
            Ok(outcome) => {
                self.read_set.extend(outcome.read_set);
                self.diagnostics.extend(outcome.diagnostics);
                outcome.value != 0
            }
            Err(err) => {
                self.push_condition_diagnostic(&err, raw);
                false
            }
        }
    }

    fn push_condition_diagnostic(&mut self, err: &PreprocessError, raw: &str) {
        self.diagnostics.push(Diagnostic::new(
            self.current_file.to_string(),
            self.current_line,
            "malformed-condition",
            format!("{err} (treating as false): {raw}"),
        ));
    }

    fn expand_tokens(&mut self, tokens: &[Token], depth: usize) -> Result<Vec<Token>, PreprocessError> {
        if depth > self.recursion_limit {
            return Err(PreprocessError::recursion_limit_exceeded(
                self.current_file.to_string(),
                self.current_line,
                "macro expansion nested too deeply".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i] {
                Token::Identifier(name) if name == "defined" => {
                    out.push(tokens[i].clone());
                    i = self.copy_defined_operand(tokens, i + 1, &mut out);
                }
                Token::Identifier(name) => {
                    if let Some(tok) = lexer::expand_predefined_macro(self.current_file, self.current_line, name) {
                        out.push(tok);
                        i += 1;
                        continue;
                    }
                    if self.disabled_macros.contains(name) {
                        out.push(tokens[i].clone());
                        i += 1;
                        continue;
                    }
                    match self.state.lookup(name) {
                        MacroValue::Defined(mac) => {
                            i = self.invoke_macro(&mac, name, tokens, i, depth, &mut out)?;
                        }
                        MacroValue::Undefined | MacroValue::MaskedBuiltin => {
                            out.push(tokens[i].clone());
                            i += 1;
                        }
                    }
                }
                other => {
                    out.push(other.clone());
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    /// Copy the `identifier` or `(identifier)` operand following a `defined`
    /// token straight into `out`, verbatim, without going through macro
    /// expansion — `defined(__linux__)` must still see the name `__linux__`,
    /// not the built-in's expansion, when it reaches `expr::parse_defined`.
    fn copy_defined_operand(&self, tokens: &[Token], mut i: usize, out: &mut Vec<Token>) -> usize {
        i = self.copy_whitespace(tokens, i, out);
        let has_paren = matches!(tokens.get(i), Some(Token::Other(s)) if s.trim_start().starts_with('('));
        if has_paren {
            out.push(tokens[i].clone());
            i += 1;
            i = self.copy_whitespace(tokens, i, out);
        }
        if matches!(tokens.get(i), Some(Token::Identifier(_))) {
            out.push(tokens[i].clone());
            i += 1;
        }
        if has_paren {
            i = self.copy_whitespace(tokens, i, out);
            if matches!(tokens.get(i), Some(Token::Other(s)) if s.trim_start().starts_with(')')) {
                out.push(tokens[i].clone());
                i += 1;
            }
        }
        i
    }

    fn copy_whitespace(&self, tokens: &[Token], mut i: usize, out: &mut Vec<Token>) -> usize {
        while let Some(Token::Other(s)) = tokens.get(i) {
            if !s.chars().all(char::is_whitespace) {
                break;
            }
            out.push(tokens[i].clone());
            i += 1;
        }
        i
    }

    fn invoke_macro(
        &mut self,
        mac: &Macro,
        name: &str,
        tokens: &[Token],
        i: usize,
        depth: usize,
        out: &mut Vec<Token>,
    ) -> Result<usize, PreprocessError> {
        if mac.body.is_function_like() {
            let next_non_ws = find_next_non_whitespace(tokens, i + 1);
            let is_invocation = next_non_ws < tokens.len()
                && matches!(&tokens[next_non_ws], Token::Other(s) if s.trim_start().starts_with('('));
            if is_invocation {
                return self.expand_function_like(mac, name, tokens, i, depth, out);
            }
        }
        self.disabled_macros.insert(name.to_string());
        let pasted = lexer::apply_token_pasting(mac.body.tokens());
        let expanded = self.expand_tokens(&pasted, depth + 1)?;
        self.disabled_macros.remove(name);
        out.extend(expanded);
        Ok(i + 1)
    }

    fn expand_function_like(
        &mut self,
        mac: &Macro,
        name: &str,
        tokens: &[Token],
        i: usize,
        depth: usize,
        out: &mut Vec<Token>,
    ) -> Result<usize, PreprocessError> {
        let Some(paren_idx) = tokens.iter().enumerate().skip(i).find_map(|(k, t)| {
            matches!(t, Token::Other(s) if s.trim().starts_with('(')).then_some(k)
        }) else {
            out.push(tokens[i].clone());
            return Ok(i + 1);
        };
        let (args, end_idx) = self.parse_macro_arguments(tokens, paren_idx)?;
        self.check_arity(mac, name, &args)?;
        self.disabled_macros.insert(name.to_string());
        let substituted = self.substitute_params(mac, &args, depth + 1)?;
        let pasted = lexer::apply_token_pasting(&substituted);
        let expanded = self.expand_tokens(&pasted, depth + 1)?;
        self.disabled_macros.remove(name);
        out.extend(expanded);
        Ok(end_idx)
    }

    fn parse_macro_arguments(&self, tokens: &[Token], paren_idx: usize) -> Result<(Vec<Vec<Token>>, usize), PreprocessError> {
        let mut args = Vec::new();
        let mut depth = 1;
        let mut current = Vec::new();
        let mut i = paren_idx + 1;
        while i < tokens.len() {
            if let Token::Other(s) = &tokens[i] {
                for ch in s.chars() {
                    match ch {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                args.push(lexer::trim_token_whitespace(current));
                                return Ok((args, i + 1));
                            }
                        }
                        ',' if depth == 1 => {
                            args.push(lexer::trim_token_whitespace(std::mem::take(&mut current)));
                        }
                        _ => current.push(Token::Other(ch.to_string())),
                    }
                }
            } else {
                current.push(tokens[i].clone());
            }
            i += 1;
        }
        Err(PreprocessError::macro_arg_mismatch(
            self.current_file.to_string(),
            self.current_line,
            "unterminated macro argument list".to_string(),
        ))
    }

    fn check_arity(&self, mac: &Macro, name: &str, args: &[Vec<Token>]) -> Result<(), PreprocessError> {
        let MacroBody::FunctionLike { params, is_variadic, .. } = &mac.body else {
            return Ok(());
        };
        let ok = if *is_variadic { args.len() >= params.len() } else { args.len() == params.len() };
        // A single empty-text argument list for a zero-parameter macro is not a mismatch.
        let ok = ok || (params.is_empty() && !is_variadic && args.len() == 1 && args[0].is_empty());
        if ok {
            Ok(())
        } else {
            Err(PreprocessError::macro_arg_mismatch(
                self.current_file.to_string(),
                self.current_line,
                format!("'{name}' expects {} argument(s), got {}", params.len(), args.len()),
            ))
        }
    }

    fn substitute_params(&mut self, mac: &Macro, args: &[Vec<Token>], depth: usize) -> Result<Vec<Token>, PreprocessError> {
        let MacroBody::FunctionLike { params, is_variadic, body } = &mac.body else {
            return Ok(mac.body.tokens().to_vec());
        };
        let mut replaced = Vec::with_capacity(body.len());
        let mut iter = body.iter().peekable();
        while let Some(tok) = iter.next() {
            match tok {
                Token::Other(s) if s.trim() == "#" => {
                    if let Some(Token::Identifier(id)) = iter.peek() {
                        if let Some(pos) = params.iter().position(|p| p == id) {
                            let escaped = stringify_arg(&args[pos]);
                            replaced.push(Token::StringLiteral(format!("\"{escaped}\"")));
                            iter.next();
                            continue;
                        }
                    }
                    replaced.push(tok.clone());
                }
                Token::Identifier(id) => {
                    if let Some(pos) = params.iter().position(|p| p == id) {
                        let expanded = self.expand_tokens(&args[pos], depth)?;
                        replaced.extend(expanded);
                    } else if id == "__VA_ARGS__" && *is_variadic {
                        let start = params.len();
                        for (idx, arg) in args.iter().enumerate().skip(start) {
                            let expanded = self.expand_tokens(arg, depth)?;
                            replaced.extend(expanded);
                            if idx + 1 < args.len() {
                                replaced.push(Token::Other(",".to_string()));
                            }
                        }
                    } else {
                        replaced.push(tok.clone());
                    }
                }
                other => replaced.push(other.clone()),
            }
        }
        Ok(replaced)
    }
}

fn stringify_arg(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(lexer::token_to_string)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

fn find_next_non_whitespace(tokens: &[Token], start: usize) -> usize {
    let mut j = start;
    while j < tokens.len() {
        match &tokens[j] {
            Token::Other(s) if s.chars().all(char::is_whitespace) => j += 1,
            _ => break,
        }
    }
    j
}

fn calculate_column(line: &str, substr: &str) -> usize {
    if substr.is_empty() {
        return 1;
    }
    line.find(substr).map_or(line.len() + 1, |pos| pos + 1)
}

fn attach_context(err: PreprocessError, raw: &str) -> PreprocessError {
    match err {
        PreprocessError::ExpressionError { file, line, detail } => {
            PreprocessError::expression_error(file, line, format!("{detail}\n  {raw}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::content::ContentRegistry;
    use std::path::Path;

    fn run(src: &str) -> CacheValue {
        let mut registry = ContentRegistry::new();
        let content = registry.intern(Path::new("t.c"), src.as_bytes());
        let analysis = analyzer::analyze(&content, "t.c");
        let config = EngineConfig::for_linux();
        let state = MacroState::from_config(&config);
        preprocess(&content, &analysis, state, &config, "t.c").unwrap()
    }

    #[test]
    fn object_like_macro_expands() {
        let out = run("#define PI 3\nint x = PI;\n");
        assert!(out.expanded_text.contains("int x = 3;"));
    }

    #[test]
    fn undef_then_ifdef_is_inactive() {
        let out = run("#define FOO 1\n#undef FOO\n#ifdef FOO\nbad\n#endif\ngood\n");
        assert!(!out.expanded_text.contains("bad"));
        assert!(out.expanded_text.contains("good"));
    }

    #[test]
    fn function_like_macro_with_args() {
        let out = run("#define ADD(a, b) ((a)+(b))\nint y = ADD(1, 2);\n");
        assert!(out.expanded_text.contains("((1)+(2))"));
    }

    #[test]
    fn elif_chain_picks_first_true_branch() {
        let out = run("#if 0\na\n#elif 1\nb\n#else\nc\n#endif\n");
        assert!(!out.expanded_text.contains('a'));
        assert!(out.expanded_text.contains('b'));
        assert!(!out.expanded_text.contains('c'));
    }

    #[test]
    fn disabled_branch_if_expression_is_not_evaluated() {
        // An invalid expression inside a dead #if branch must not error.
        let out = run("#if 0\n#if not valid c syntax at all ???\n#endif\n#endif\nok\n");
        assert!(out.expanded_text.contains("ok"));
    }

    #[test]
    fn defined_on_a_builtin_object_like_macro_sees_the_name_not_its_value() {
        // __linux__ expands to "1"; defined(__linux__) must still see the
        // identifier, not "defined(1)".
        let out = run("#if defined(__linux__)\nyes\n#endif\n");
        assert!(out.expanded_text.contains("yes"));
    }

    #[test]
    fn malformed_condition_is_a_diagnostic_not_a_fatal_error() {
        let out = run("#if 1 +\nbad\n#endif\ngood\n");
        assert!(!out.expanded_text.contains("bad"));
        assert!(out.expanded_text.contains("good"));
        assert!(out.diagnostics.iter().any(|d| d.tag == "malformed-condition"));
    }

    #[test]
    fn computed_include_is_reported_with_expanded_target() {
        let out = run("#define HDR \"a.h\"\n#include HDR\n");
        assert_eq!(out.includes.len(), 1);
        assert_eq!(out.includes[0].1, "a.h");
    }

    #[test]
    fn magic_annotation_in_inactive_branch_is_dropped() {
        let out = run(
            "#define VER 1\n#if VER < 2\n//#CXXFLAGS=-DUSE_LEGACY\n#else\n//#CXXFLAGS=-DUSE_MODERN\n#endif\n",
        );
        let values: Vec<&str> = out.magic.iter().map(|m| m.value.as_str()).collect();
        assert_eq!(values, vec!["-DUSE_LEGACY"]);
    }
}

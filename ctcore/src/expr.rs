//! Controlling-expression evaluator for `#if`/`#elif` (spec §4.2).
//!
//! Tracks a **read set**: every macro name actually inspected while
//! evaluating (including inside `defined(...)`) is recorded, and the right
//! operand of `&&`, `||`, and `?:` does not contribute to the read set when
//! short-circuited — this is what makes the preprocessing cache's variant
//! fingerprint minimal (spec §4.4, Testable Property 5, scenario S6).

use std::collections::BTreeSet;

use crate::error::{Diagnostic, PreprocessError};
use crate::macro_state::MacroState;
use crate::token::ExprToken;

/// Outcome of evaluating a `#if`/`#elif` controlling expression.
pub struct EvalOutcome {
    /// Truthiness of the expression (nonzero => true).
    pub value: i64,
    /// Every macro name the evaluator actually looked at.
    pub read_set: BTreeSet<String>,
    /// Non-fatal findings (e.g. division by zero, which C evaluates to 0
    /// with a diagnostic rather than aborting compilation outright).
    pub diagnostics: Vec<Diagnostic>,
}

/// Tokenize a `#if`/`#elif` expression into [`ExprToken`]s.
///
/// # Errors
/// Returns [`PreprocessError::ExpressionError`] on an unrecognized character
/// or malformed operator.
pub fn tokenize(expr: &str, file: &str, line: usize) -> Result<Vec<ExprToken>, PreprocessError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '0'..='9' => {
                let mut num = String::new();
                num.push(ch);
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == 'x' || d == 'X' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(ExprToken::Number(parse_integer_literal(&num).ok_or_else(|| {
                    PreprocessError::expression_error(file.to_string(), line, format!("invalid number: {num}"))
                })?));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                ident.push(ch);
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(ExprToken::Identifier(ident));
            }
            '(' => tokens.push(ExprToken::LParen),
            ')' => tokens.push(ExprToken::RParen),
            '~' => tokens.push(ExprToken::BitNot),
            '?' => tokens.push(ExprToken::Question),
            ':' => tokens.push(ExprToken::Colon),
            '!' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(ExprToken::NotEqual);
                } else {
                    tokens.push(ExprToken::Not);
                }
            }
            '=' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(ExprToken::Equal);
                } else {
                    return Err(PreprocessError::expression_error(file.to_string(), line, "invalid operator: =".to_string()));
                }
            }
            '<' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(ExprToken::LessEqual);
                } else if chars.peek() == Some(&'<') {
                    chars.next();
                    tokens.push(ExprToken::ShiftLeft);
                } else {
                    tokens.push(ExprToken::Less);
                }
            }
            '>' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(ExprToken::GreaterEqual);
                } else if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(ExprToken::ShiftRight);
                } else {
                    tokens.push(ExprToken::Greater);
                }
            }
            '&' => {
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(ExprToken::And);
                } else {
                    tokens.push(ExprToken::BitAnd);
                }
            }
            '|' => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(ExprToken::Or);
                } else {
                    tokens.push(ExprToken::BitOr);
                }
            }
            '^' => tokens.push(ExprToken::BitXor),
            '+' => tokens.push(ExprToken::Plus),
            '-' => tokens.push(ExprToken::Minus),
            '*' => tokens.push(ExprToken::Multiply),
            '/' => tokens.push(ExprToken::Divide),
            '%' => tokens.push(ExprToken::Modulo),
            c if c.is_whitespace() => {}
            _ => {
                return Err(PreprocessError::expression_error(
                    file.to_string(),
                    line,
                    format!("invalid character: {ch}"),
                ));
            }
        }
    }

    Ok(tokens)
}

/// Parse a C integer literal, honoring `0x`/`0` bases and `u`/`l`/`ll` suffixes
/// in any case/order.
fn parse_integer_literal(raw: &str) -> Option<i64> {
    let lower = raw.to_ascii_lowercase();
    let digits_end = lower
        .rfind(|c: char| c.is_ascii_hexdigit() || c == 'x')
        .map_or(0, |i| i + 1);
    // Walk back past trailing u/l characters that aren't part of a hex digit run.
    let mut end = lower.len();
    while end > 0 && matches!(lower.as_bytes()[end - 1], b'u' | b'l') {
        end -= 1;
    }
    let end = end.max(digits_end.min(end));
    let digits = &lower[..end];
    if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if digits.len() > 1 && digits.starts_with('0') && digits.bytes().all(|b| b.is_ascii_digit()) {
        i64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse::<i64>().ok()
    }
}

struct Evaluator<'a> {
    state: &'a MacroState,
    read_set: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
    file: String,
    line: usize,
}

/// Evaluate a token stream against a macro state, producing a value, the
/// read set of macro names actually consulted, and any non-fatal diagnostics.
///
/// # Errors
/// Returns [`PreprocessError::ExpressionError`] if the expression is
/// structurally malformed (unbalanced parens, trailing tokens, a `defined`
/// not followed by an identifier).
pub fn evaluate(
    tokens: &[ExprToken],
    state: &MacroState,
    file: &str,
    line: usize,
) -> Result<EvalOutcome, PreprocessError> {
    let mut ev = Evaluator {
        state,
        read_set: BTreeSet::new(),
        diagnostics: Vec::new(),
        file: file.to_string(),
        line,
    };
    let mut pos = 0;
    let value = ev.parse_ternary(tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(ev.err("unexpected tokens at end of expression"));
    }
    Ok(EvalOutcome {
        value,
        read_set: ev.read_set,
        diagnostics: ev.diagnostics,
    })
}

impl Evaluator<'_> {
    fn err(&self, detail: &str) -> PreprocessError {
        PreprocessError::expression_error(self.file.clone(), self.line, detail.to_string())
    }

    fn parse_ternary(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let cond = self.parse_or(tokens, pos)?;
        if *pos < tokens.len() && tokens[*pos] == ExprToken::Question {
            *pos += 1;
            if cond != 0 {
                let then_val = self.parse_ternary(tokens, pos)?;
                self.expect_colon(tokens, pos)?;
                self.skip_ternary_silently(tokens, pos)?;
                Ok(then_val)
            } else {
                self.skip_ternary_silently(tokens, pos)?;
                self.expect_colon(tokens, pos)?;
                self.parse_ternary(tokens, pos)
            }
        } else {
            Ok(cond)
        }
    }

    /// Parse (and discard) the branch that short-circuited, without letting
    /// any identifiers it reads contribute to the read set.
    fn skip_ternary_silently(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<(), PreprocessError> {
        let saved_read_set = self.read_set.clone();
        let _ = self.parse_ternary(tokens, pos)?;
        self.read_set = saved_read_set;
        Ok(())
    }

    fn expect_colon(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<(), PreprocessError> {
        if *pos < tokens.len() && tokens[*pos] == ExprToken::Colon {
            *pos += 1;
            Ok(())
        } else {
            Err(self.err("expected ':' in ternary expression"))
        }
    }

    fn parse_or(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_and(tokens, pos)?;
        while *pos < tokens.len() && tokens[*pos] == ExprToken::Or {
            *pos += 1;
            if left != 0 {
                self.skip_and_silently(tokens, pos)?;
                left = 1;
            } else {
                let right = self.parse_and(tokens, pos)?;
                left = i64::from(right != 0);
            }
        }
        Ok(left)
    }

    fn skip_and_silently(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<(), PreprocessError> {
        let saved = self.read_set.clone();
        let _ = self.parse_and(tokens, pos)?;
        self.read_set = saved;
        Ok(())
    }

    fn parse_and(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_bitor(tokens, pos)?;
        while *pos < tokens.len() && tokens[*pos] == ExprToken::And {
            *pos += 1;
            if left == 0 {
                self.skip_bitor_silently(tokens, pos)?;
                left = 0;
            } else {
                let right = self.parse_bitor(tokens, pos)?;
                left = i64::from(right != 0);
            }
        }
        Ok(left)
    }

    fn skip_bitor_silently(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<(), PreprocessError> {
        let saved = self.read_set.clone();
        let _ = self.parse_bitor(tokens, pos)?;
        self.read_set = saved;
        Ok(())
    }

    fn parse_bitor(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_bitxor(tokens, pos)?;
        while *pos < tokens.len() && tokens[*pos] == ExprToken::BitOr {
            *pos += 1;
            left |= self.parse_bitxor(tokens, pos)?;
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_bitand(tokens, pos)?;
        while *pos < tokens.len() && tokens[*pos] == ExprToken::BitXor {
            *pos += 1;
            left ^= self.parse_bitand(tokens, pos)?;
        }
        Ok(left)
    }

    fn parse_bitand(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_comparison(tokens, pos)?;
        while *pos < tokens.len() && tokens[*pos] == ExprToken::BitAnd {
            *pos += 1;
            left &= self.parse_comparison(tokens, pos)?;
        }
        Ok(left)
    }

    fn parse_comparison(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let left = self.parse_shift(tokens, pos)?;
        if *pos < tokens.len() {
            let op = tokens[*pos].clone();
            let result = match op {
                ExprToken::Equal => Some(i64::from(left == self.after(tokens, pos, Self::parse_shift)?)),
                ExprToken::NotEqual => Some(i64::from(left != self.after(tokens, pos, Self::parse_shift)?)),
                ExprToken::Less => Some(i64::from(left < self.after(tokens, pos, Self::parse_shift)?)),
                ExprToken::LessEqual => Some(i64::from(left <= self.after(tokens, pos, Self::parse_shift)?)),
                ExprToken::Greater => Some(i64::from(left > self.after(tokens, pos, Self::parse_shift)?)),
                ExprToken::GreaterEqual => Some(i64::from(left >= self.after(tokens, pos, Self::parse_shift)?)),
                _ => None,
            };
            if let Some(v) = result {
                return Ok(v);
            }
        }
        Ok(left)
    }

    /// Helper to consume an operator already peeked and parse its RHS.
    fn after(
        &mut self,
        tokens: &[ExprToken],
        pos: &mut usize,
        parser: fn(&mut Self, &[ExprToken], &mut usize) -> Result<i64, PreprocessError>,
    ) -> Result<i64, PreprocessError> {
        *pos += 1;
        parser(self, tokens, pos)
    }

    fn parse_shift(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_additive(tokens, pos)?;
        loop {
            match tokens.get(*pos) {
                Some(ExprToken::ShiftLeft) => {
                    *pos += 1;
                    left = left.wrapping_shl(self.shift_amount(tokens, pos, Self::parse_additive)?);
                }
                Some(ExprToken::ShiftRight) => {
                    *pos += 1;
                    left = left.wrapping_shr(self.shift_amount(tokens, pos, Self::parse_additive)?);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn shift_amount(
        &mut self,
        tokens: &[ExprToken],
        pos: &mut usize,
        parser: fn(&mut Self, &[ExprToken], &mut usize) -> Result<i64, PreprocessError>,
    ) -> Result<u32, PreprocessError> {
        let raw = parser(self, tokens, pos)?;
        Ok(u32::try_from(raw.rem_euclid(64)).unwrap_or(0))
    }

    fn parse_additive(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_multiplicative(tokens, pos)?;
        loop {
            match tokens.get(*pos) {
                Some(ExprToken::Plus) => {
                    *pos += 1;
                    left = left.wrapping_add(self.parse_multiplicative(tokens, pos)?);
                }
                Some(ExprToken::Minus) => {
                    *pos += 1;
                    left = left.wrapping_sub(self.parse_multiplicative(tokens, pos)?);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let mut left = self.parse_unary(tokens, pos)?;
        loop {
            match tokens.get(*pos) {
                Some(ExprToken::Multiply) => {
                    *pos += 1;
                    left = left.wrapping_mul(self.parse_unary(tokens, pos)?);
                }
                Some(ExprToken::Divide) => {
                    *pos += 1;
                    let right = self.parse_unary(tokens, pos)?;
                    left = if right == 0 {
                        self.diagnostics.push(Diagnostic::new(
                            self.file.clone(),
                            self.line,
                            "division-by-zero",
                            "division by zero in #if expression, treated as 0",
                        ));
                        0
                    } else {
                        left.wrapping_div(right)
                    };
                }
                Some(ExprToken::Modulo) => {
                    *pos += 1;
                    let right = self.parse_unary(tokens, pos)?;
                    left = if right == 0 {
                        self.diagnostics.push(Diagnostic::new(
                            self.file.clone(),
                            self.line,
                            "division-by-zero",
                            "modulo by zero in #if expression, treated as 0",
                        ));
                        0
                    } else {
                        left.wrapping_rem(right)
                    };
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        match tokens.get(*pos) {
            Some(ExprToken::Not) => {
                *pos += 1;
                Ok(i64::from(self.parse_unary(tokens, pos)? == 0))
            }
            Some(ExprToken::Minus) => {
                *pos += 1;
                Ok(self.parse_unary(tokens, pos)?.wrapping_neg())
            }
            Some(ExprToken::Plus) => {
                *pos += 1;
                self.parse_unary(tokens, pos)
            }
            Some(ExprToken::BitNot) => {
                *pos += 1;
                Ok(!self.parse_unary(tokens, pos)?)
            }
            _ => self.parse_primary(tokens, pos),
        }
    }

    fn parse_primary(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        match tokens.get(*pos) {
            None => Err(self.err("unexpected end of expression")),
            Some(ExprToken::Number(val)) => {
                *pos += 1;
                Ok(*val)
            }
            Some(ExprToken::Identifier(ident)) if ident == "defined" => {
                *pos += 1;
                self.parse_defined(tokens, pos)
            }
            Some(ExprToken::Identifier(ident)) => {
                let ident = ident.clone();
                *pos += 1;
                self.read_set.insert(ident.clone());
                Ok(0) // an identifier that isn't `defined(...)` and isn't a known value expands to 0
            }
            Some(ExprToken::LParen) => {
                *pos += 1;
                let value = self.parse_ternary(tokens, pos)?;
                if tokens.get(*pos) != Some(&ExprToken::RParen) {
                    return Err(self.err("expected ')'"));
                }
                *pos += 1;
                Ok(value)
            }
            _ => Err(self.err("expected number, identifier, or '('")),
        }
    }

    fn parse_defined(&mut self, tokens: &[ExprToken], pos: &mut usize) -> Result<i64, PreprocessError> {
        let parenthesized = tokens.get(*pos) == Some(&ExprToken::LParen);
        if parenthesized {
            *pos += 1;
        }
        let Some(ExprToken::Identifier(id)) = tokens.get(*pos) else {
            return Err(self.err("defined must be followed by an identifier or (identifier)"));
        };
        let id = id.clone();
        *pos += 1;
        if parenthesized {
            if tokens.get(*pos) != Some(&ExprToken::RParen) {
                return Err(self.err("expected ')' after defined(identifier"));
            }
            *pos += 1;
        }
        self.read_set.insert(id.clone());
        Ok(i64::from(self.state.is_defined(&id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn eval(expr: &str, state: &MacroState) -> EvalOutcome {
        let tokens = tokenize(expr, "t.c", 1).unwrap();
        evaluate(&tokens, state, "t.c", 1).unwrap()
    }

    #[test]
    fn short_circuit_and_excludes_right_operand_from_read_set() {
        let state = MacroState::empty();
        let outcome = eval("0 && defined(NEVER_READ)", &state);
        assert_eq!(outcome.value, 0);
        assert!(!outcome.read_set.contains("NEVER_READ"));
    }

    #[test]
    fn short_circuit_or_excludes_right_operand_from_read_set() {
        let state = MacroState::empty();
        let outcome = eval("1 || defined(NEVER_READ)", &state);
        assert_eq!(outcome.value, 1);
        assert!(!outcome.read_set.contains("NEVER_READ"));
    }

    #[test]
    fn ternary_excludes_untaken_branch_from_read_set() {
        let state = MacroState::empty();
        let outcome = eval("1 ? 5 : defined(NEVER_READ)", &state);
        assert_eq!(outcome.value, 5);
        assert!(!outcome.read_set.contains("NEVER_READ"));
    }

    #[test]
    fn division_by_zero_yields_zero_and_diagnostic() {
        let state = MacroState::empty();
        let outcome = eval("1 / 0", &state);
        assert_eq!(outcome.value, 0);
        assert_eq!(outcome.diagnostics.len(), 1);
    }

    #[test]
    fn bitwise_and_shift_operators() {
        let state = MacroState::empty();
        assert_eq!(eval("0x6 & 0x3", &state).value, 2);
        assert_eq!(eval("1 << 4", &state).value, 16);
        assert_eq!(eval("~0 & 0xFF", &state).value, 255);
    }

    #[test]
    fn defined_reads_from_macro_state() {
        let state = MacroState::from_config(&EngineConfig::for_linux());
        let outcome = eval("defined(__linux__)", &state);
        assert_eq!(outcome.value, 1);
        assert!(outcome.read_set.contains("__linux__"));
    }
}

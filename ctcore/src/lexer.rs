//! Stateless lexical operations shared by the analyzer and the preprocessor:
//! tokenizing a line, stripping comments, line splicing, `_Pragma` rewriting,
//! token pasting, and stringification. None of this depends on macro state,
//! which is what lets the analyzer run it once per content hash and cache
//! the result (spec §4.1).

use crate::token::{Token, is_identifier_continue, is_identifier_start};

/// Tokenize a single logical line of source code.
#[must_use]
pub fn tokenize_line(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut it = line.chars().peekable();

    while let Some(&ch) = it.peek() {
        if is_identifier_start(ch) {
            let mut s = String::new();
            while let Some(&c2) = it.peek() {
                if is_identifier_continue(c2) {
                    s.push(c2);
                    it.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(s));
        } else if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut s = String::new();
            s.push(quote);
            it.next();
            while let Some(c2) = it.next() {
                s.push(c2);
                if c2 == '\\' {
                    if let Some(c3) = it.next() {
                        s.push(c3);
                    }
                } else if c2 == quote {
                    break;
                }
            }
            if quote == '"' {
                tokens.push(Token::StringLiteral(s));
            } else {
                tokens.push(Token::CharLiteral(s));
            }
        } else if ch == '/' {
            it.next();
            match it.peek() {
                Some('/') => {
                    it.next();
                    for _ in it.by_ref() {}
                    tokens.push(Token::Other(" ".to_string()));
                }
                Some('*') => {
                    it.next();
                    let mut prev = '\0';
                    for c2 in it.by_ref() {
                        if prev == '*' && c2 == '/' {
                            break;
                        }
                        prev = c2;
                    }
                    tokens.push(Token::Other(" ".to_string()));
                }
                _ => tokens.push(Token::Other("/".to_string())),
            }
        } else if ch.is_whitespace() {
            let mut s = String::new();
            while let Some(&c2) = it.peek() {
                if c2.is_whitespace() {
                    s.push(c2);
                    it.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Other(s));
        } else if let Some(c) = it.next() {
            if c == '#' && it.peek() == Some(&'#') {
                it.next();
                tokens.push(Token::Other("##".to_string()));
            } else {
                tokens.push(Token::Other(c.to_string()));
            }
        } else {
            break;
        }
    }
    tokens
}

/// Strip `//` and `/* */` comments, replacing them with a single space,
/// without touching the contents of string/char literals.
///
/// Returns `None` if a block comment or string/char literal is left
/// unterminated at end of input (spec §4.1 Failure: non-fatal, analyzer
/// emits a diagnostic and treats the rest of the line as comment/string).
#[must_use]
pub fn strip_comments(input: &str) -> (String, bool) {
    if !input.contains('/') && !input.contains('"') && !input.contains('\'') {
        return (input.to_string(), true);
    }

    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut quote_char = '\0';
    let mut well_formed = true;

    while let Some(ch) = chars.next() {
        if !in_string {
            if ch == '"' || ch == '\'' {
                in_string = true;
                quote_char = ch;
            } else if ch == '/' && chars.peek() == Some(&'/') {
                chars.next();
                result.push(' ');
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push(c);
                        break;
                    }
                }
                continue;
            } else if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                result.push(' ');
                let mut prev = '\0';
                let mut terminated = false;
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        terminated = true;
                        break;
                    }
                    prev = c;
                }
                if !terminated {
                    well_formed = false;
                }
                continue;
            }
        } else if ch == quote_char {
            let mut backslash_count = 0;
            let mut pos = result.len();
            while pos > 0 && result.as_bytes()[pos - 1] == b'\\' {
                backslash_count += 1;
                pos -= 1;
            }
            if backslash_count % 2 == 0 {
                in_string = false;
                quote_char = '\0';
            }
        }
        result.push(ch);
    }
    if in_string {
        well_formed = false;
    }
    (result, well_formed)
}

/// Join lines ending in a backslash-newline (C's line splicing).
#[must_use]
pub fn line_splice(input: &str) -> String {
    line_splice_with_map(input).0
}

/// [`line_splice`], plus the logical→physical line map a caller needs to
/// report *source* line numbers rather than post-splice ones (spec §4.1:
/// continuations "are joined before directive parsing but preserved in the
/// `AnalysisResult` as separate source lines"). `map[i]` is the 1-based
/// physical line a spliced file's logical line `i + 1` starts at.
#[must_use]
pub fn line_splice_with_map(input: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(input.len());
    let mut map = vec![1usize];
    let mut physical_line = 1usize;
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                    physical_line += 1;
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    physical_line += 1;
                }
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
            if ch == '\n' {
                physical_line += 1;
                map.push(physical_line);
            }
        }
    }
    (out, map)
}

/// Rewrite `_Pragma("text")` operators into `#pragma text` directive lines.
#[must_use]
pub fn process_pragma(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut result = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        if i + 7 <= chars.len() && chars[i..i + 7] == ['_', 'P', 'r', 'a', 'g', 'm', 'a'] {
            let mut j = i + 7;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j] == '(' {
                j += 1;
                if j < chars.len() && chars[j] == '"' {
                    j += 1;
                    let mut content = String::new();
                    while j < chars.len() {
                        if chars[j] == '"' {
                            let mut backslashes = 0;
                            let mut k = j;
                            while k > 0 && chars[k - 1] == '\\' {
                                backslashes += 1;
                                k -= 1;
                            }
                            if backslashes % 2 == 0 {
                                break;
                            }
                            content.push(chars[j]);
                        } else {
                            content.push(chars[j]);
                        }
                        j += 1;
                    }
                    if j < chars.len() && chars[j] == '"' {
                        j += 1;
                        while j < chars.len() && chars[j].is_whitespace() {
                            j += 1;
                        }
                        if j < chars.len() && chars[j] == ')' {
                            j += 1;
                            result.push_str("#pragma ");
                            result.push_str(&content);
                            i = j;
                            continue;
                        }
                    }
                }
            }
        }
        result.push(chars[i]);
        i += 1;
    }
    result
}

/// Raw textual content of a token, for concatenation and reconstruction.
#[must_use]
pub fn token_to_string(token: &Token) -> &str {
    match token {
        Token::Identifier(s) | Token::Other(s) | Token::StringLiteral(s) | Token::CharLiteral(s) => s,
    }
}

/// Reconstruct source text from a token sequence.
#[must_use]
pub fn tokens_to_string(tokens: &[Token]) -> String {
    let total_len: usize = tokens.iter().map(|t| token_to_string(t).len()).sum();
    let mut out = String::with_capacity(total_len);
    for t in tokens {
        out.push_str(token_to_string(t));
    }
    out
}

fn is_whitespace_token(token: &Token) -> bool {
    matches!(token, Token::Other(s) if s.chars().all(char::is_whitespace))
}

/// Trim leading/trailing whitespace tokens from a sequence.
#[must_use]
pub fn trim_token_whitespace(mut tokens: Vec<Token>) -> Vec<Token> {
    let mut start = 0;
    while start < tokens.len() && is_whitespace_token(&tokens[start]) {
        start += 1;
    }
    let mut end = tokens.len();
    while end > start && is_whitespace_token(&tokens[end - 1]) {
        end -= 1;
    }
    if start > 0 || end < tokens.len() {
        tokens.drain(end..);
        tokens.drain(0..start);
    }
    tokens
}

fn concatenate_tokens(left: &Token, right: &Token) -> Token {
    let concatenated = format!("{}{}", token_to_string(left), token_to_string(right));
    match (left, right) {
        (Token::Identifier(_), Token::Identifier(_)) => Token::Identifier(concatenated),
        _ => Token::Other(concatenated),
    }
}

/// Apply `##` token pasting to a replacement list.
#[must_use]
pub fn apply_token_pasting(tokens: &[Token]) -> Vec<Token> {
    let mut result: Vec<Token> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Other(s) = &tokens[i] {
            if s.trim() == "##" {
                let mut prev_idx = if result.is_empty() { None } else { Some(result.len() - 1) };
                while let Some(idx) = prev_idx {
                    if !is_whitespace_token(&result[idx]) {
                        break;
                    }
                    prev_idx = if idx == 0 { None } else { Some(idx - 1) };
                }
                if let Some(p_idx) = prev_idx {
                    while result.last().is_some_and(is_whitespace_token) {
                        result.pop();
                    }
                    let mut next_idx = i + 1;
                    while next_idx < tokens.len() && is_whitespace_token(&tokens[next_idx]) {
                        next_idx += 1;
                    }
                    if next_idx < tokens.len() {
                        let concatenated = concatenate_tokens(&result[p_idx], &tokens[next_idx]);
                        result[p_idx] = concatenated;
                        i = next_idx + 1;
                        continue;
                    }
                }
                result.push(tokens[i].clone());
                i += 1;
                continue;
            }
        }
        result.push(tokens[i].clone());
        i += 1;
    }
    result
}

/// Expand `__LINE__`/`__FILE__`/`__DATE__`/`__TIME__` if `name` is one of them.
#[must_use]
pub fn expand_predefined_macro(file: &str, line: usize, name: &str) -> Option<Token> {
    use crate::date_time::{format_date, format_time};

    match name {
        "__LINE__" => Some(Token::Other(line.to_string())),
        "__FILE__" => Some(Token::StringLiteral(format!("\"{file}\""))),
        "__DATE__" => Some(Token::StringLiteral(format!("\"{}\"", format_date()))),
        "__TIME__" => Some(Token::StringLiteral(format!("\"{}\"", format_time()))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_comments_preserves_strings() {
        let (out, ok) = strip_comments(r#"const char* s = "http://x"; // trailing"#);
        assert!(ok);
        assert!(out.contains("\"http://x\""));
        assert!(!out.contains("trailing"));
    }

    #[test]
    fn unterminated_block_comment_is_reported() {
        let (_, ok) = strip_comments("int x; /* oops");
        assert!(!ok);
    }

    #[test]
    fn line_splice_map_points_continuations_back_at_their_first_physical_line() {
        let (joined, map) = line_splice_with_map("a\\\nb\nc\n");
        assert_eq!(joined, "ab\nc\n");
        // logical line 1 ("ab") starts at physical line 1.
        assert_eq!(map[0], 1);
        // logical line 2 ("c") starts at physical line 3, not 2.
        assert_eq!(map[1], 3);
    }

    #[test]
    fn token_pasting_joins_identifiers() {
        let tokens = tokenize_line("foo ## bar");
        let pasted = apply_token_pasting(&tokens);
        assert_eq!(tokens_to_string(&pasted).trim(), "foobar");
    }
}

//! Go test naming rules: which functions are tests, how subtest names are
//! rewritten by the test binary, and how string literals decode.

/// Whether `name` is `prefix` followed by nothing or a non-lowercase rune.
pub fn is_test_name(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => rest.chars().next().is_none_or(|c| !c.is_lowercase()),
        None => false,
    }
}

/// Rewrite a subtest name the way the test binary reports it: whitespace
/// becomes `_` and non-printable runes are escaped.
pub fn rewrite_subtest_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if is_space(c) {
            out.push('_');
        } else if !is_print(c) {
            push_quoted_rune(&mut out, c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape as `strconv.QuoteRune` does, without the quotes.
fn push_quoted_rune(out: &mut String, c: char) {
    let code = c as u32;
    match c {
        '\u{7}' => out.push_str("\\a"),
        '\u{8}' => out.push_str("\\b"),
        '\u{c}' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\u{b}' => out.push_str("\\v"),
        _ if code < 0x20 || code == 0x7f => out.push_str(&format!("\\x{code:02x}")),
        _ if code <= 0xffff => out.push_str(&format!("\\u{code:04x}")),
        _ => out.push_str(&format!("\\U{code:08x}")),
    }
}

/// Approximates `strconv.IsPrint`: controls, format characters, private use
/// and noncharacters are not printable. Unassigned code points are treated
/// as printable.
fn is_print(c: char) -> bool {
    let code = c as u32;
    if c.is_control() {
        return false;
    }
    let format = matches!(
        code,
        0xad | 0x600..=0x605
            | 0x61c
            | 0x6dd
            | 0x70f
            | 0x890..=0x891
            | 0x8e2
            | 0x180e
            | 0x200b..=0x200f
            | 0x202a..=0x202e
            | 0x2060..=0x2064
            | 0x2066..=0x206f
            | 0xfeff
            | 0xfff9..=0xfffb
            | 0x110bd
            | 0x110cd
            | 0x13430..=0x1343f
            | 0x1bca0..=0x1bca3
            | 0x1d173..=0x1d17a
            | 0xe0001
            | 0xe0020..=0xe007f
    );
    let private = matches!(code, 0xe000..=0xf8ff | 0xf0000..=0xffffd | 0x100000..=0x10fffd);
    let nonchar = (0xfdd0..=0xfdef).contains(&code) || code & 0xfffe == 0xfffe;
    !(format || private || nonchar)
}

fn is_space(c: char) -> bool {
    let code = c as u32;
    if code < 0x2000 {
        matches!(
            code,
            0x09 | 0x0a | 0x0b | 0x0c | 0x0d | 0x20 | 0x85 | 0xa0 | 0x1680
        )
    } else {
        code <= 0x200a || matches!(code, 0x2028 | 0x2029 | 0x202f | 0x205f | 0x3000)
    }
}

/// Decode a Go string literal (interpreted or raw). Returns `None` for text
/// that is not a string literal or carries an invalid escape.
pub fn unquote(literal: &str) -> Option<String> {
    if let Some(raw) = literal
        .strip_prefix('`')
        .and_then(|rest| rest.strip_suffix('`'))
    {
        return Some(raw.replace('\r', ""));
    }
    let inner = literal.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0c}',
            'v' => '\u{0b}',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            'x' => hex_escape(&mut chars, 2)?,
            'u' => hex_escape(&mut chars, 4)?,
            'U' => hex_escape(&mut chars, 8)?,
            d @ '0'..='7' => {
                let mut code = d.to_digit(8)?;
                for _ in 0..2 {
                    code = code * 8 + chars.next()?.to_digit(8)?;
                }
                char::from_u32(code)?
            }
            _ => return None,
        };
        out.push(decoded);
    }
    Some(out)
}

fn hex_escape(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}

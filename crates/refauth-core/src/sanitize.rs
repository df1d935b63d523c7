/// Strips markup from a free-text field before it is stored.
///
/// Removes anything that looks like a tag (`<...>`), including unterminated
/// ones, drops control characters, and trims surrounding whitespace. A `<`
/// not followed by a letter, `/`, `!` or `?` is kept as literal text.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '<' {
            let starts_tag = chars
                .peek()
                .is_some_and(|n| n.is_ascii_alphabetic() || matches!(n, '/' | '!' | '?'));
            if starts_tag {
                for skipped in chars.by_ref() {
                    if skipped == '>' {
                        break;
                    }
                }
                continue;
            }
        }
        if c.is_control() {
            continue;
        }
        out.push(c);
    }

    out.trim().to_string()
}

/// Sanitizes an optional field, mapping absent input to an empty string.
pub fn sanitize_opt(input: Option<&str>) -> String {
    input.map(sanitize).unwrap_or_default()
}

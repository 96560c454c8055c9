//! Minimal RFC 4180 row encoding for the decision log
//!
//! Fields containing a comma, quote, CR or LF are quoted, with quotes doubled.
//! Rows are always single-line: the writer never emits raw line breaks
//! inside a field, so the reader can split the file on '\n'.

/// Encode fields as one CSV line, without the terminator
pub fn encode_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        push_field(&mut line, field.as_ref());
    }
    line
}

fn push_field(line: &mut String, field: &str) {
    // Line breaks would split the row; they carry no meaning in any logged field
    let field = field.replace(['\r', '\n'], " ");
    if field.contains([',', '"']) {
        line.push('"');
        line.push_str(&field.replace('"', "\"\""));
        line.push('"');
    } else {
        line.push_str(&field);
    }
}

/// Split one CSV line into fields, honouring quotes
pub fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

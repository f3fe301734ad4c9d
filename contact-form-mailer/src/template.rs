//! Literal placeholder substitution for the email documents.
//!
//! The HTML documents are maintained outside the code base and contain inline CSS, so they are
//! not run through a template engine. A placeholder is a `{key}` sequence whose key appears in the
//! supplied values; anything else between braces is copied through unchanged.
//!
//! [`render`] performs no escaping. Callers escape user input with [`escape_html`] (and
//! optionally [`nl2br`]) before passing it in.

/// Substitutes every `{key}` placeholder in `template` with its value.
///
/// Substitution happens in a single pass, so a value which itself contains placeholder syntax is
/// inserted verbatim.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];
        let placeholder = candidate.find('}').and_then(|end| {
            let key = &candidate[..end];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (end, *value))
        });
        match placeholder {
            Some((end, value)) => {
                output.push_str(value);
                rest = &candidate[end + 1..];
            }
            None => {
                output.push('{');
                rest = candidate;
            }
        }
    }
    output.push_str(rest);
    output
}

pub fn escape_html(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    tinytemplate::escape(value, &mut output);
    output
}

/// Inserts `<br />` before every line break, keeping the line break itself.
pub fn nl2br(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                output.push_str("<br />\r\n");
            }
            '\r' | '\n' => {
                output.push_str("<br />");
                output.push(c);
            }
            _ => output.push(c),
        }
    }
    output
}

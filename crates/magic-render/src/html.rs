//! Final touches applied to rendered HTML.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt::Write;

use markup_fmt::config::FormatOptions;
use markup_fmt::{format_text, Language};

const DOCTYPE: &str = "<!DOCTYPE html>\n";

/// Reformat serialized HTML with consistent indentation.
///
/// Embedded scripts and styles are passed through untouched.
pub fn pretty_print(content: &str) -> Result<String, String> {
    format_text(
        content,
        Language::Html,
        &FormatOptions::default(),
        |code, _| Ok::<_, Infallible>(Cow::Borrowed(code)),
    )
    .map_err(|e| format!("{:?}", e))
}

/// Turn finalized markup into the file that gets written.
///
/// Collapses the blank line after `</head>`, escapes everything outside
/// printable ASCII, adds a doctype when missing and ends with a newline.
pub fn finish_document(content: &str) -> String {
    let content = content.replacen("</head>\n\n", "</head>\n", 1);
    let mut content = escape_non_ascii(&content);

    if !content.ends_with('\n') {
        content.push('\n');
    }

    if has_doctype(&content) {
        content
    } else {
        format!("{}{}", DOCTYPE, content)
    }
}

/// Replace every character other than tab, CR, LF and printable ASCII with a
/// numeric character reference.
pub fn escape_non_ascii(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        if matches!(c, '\t' | '\n' | '\r' | ' '..='~') {
            out.push(c);
        } else {
            let _ = write!(out, "&#x{:X};", c as u32);
        }
    }
    out
}

fn has_doctype(content: &str) -> bool {
    content
        .trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("<!doctype"))
}

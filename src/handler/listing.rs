//! Directory listing generation
//!
//! Renders an HTML page with the immediate entries of a directory when
//! no index file is present. Entry names are HTML-escaped for display
//! and percent-encoded in hrefs.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters percent-encoded inside listing hrefs, on top of controls
const HREF_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'%');

/// A single directory entry to render
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

/// Render the listing page for `dir_path` (the request path, with
/// trailing slash) containing `entries`
pub fn render(dir_path: &str, entries: &[Entry]) -> String {
    let title = escape_html(dir_path);
    let mut items = String::new();

    if dir_path != "/" {
        items.push_str("        <li><a href=\"../\">../</a></li>\n");
    }

    for entry in entries {
        let display = if entry.is_dir {
            format!("{}/", escape_html(&entry.name))
        } else {
            escape_html(&entry.name)
        };
        let mut href = utf8_percent_encode(&entry.name, HREF_ENCODE_SET).to_string();
        if entry.is_dir {
            href.push('/');
        }
        items.push_str(&format!(
            "        <li><a href=\"{href}\">{display}</a></li>\n"
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Index of {title}</title>
</head>
<body>
    <h1>Index of {title}</h1>
    <hr>
    <ul>
{items}    </ul>
    <hr>
</body>
</html>"#
    )
}

/// Escape special characters for HTML text and attribute values
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

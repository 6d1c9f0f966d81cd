//! Configuration page markup.

use crate::wifi::ScanResult;

const PAGE_HEAD: &str = r#"<html>
<body>
<form action="/results.html" target="_blank" method="post">
<label for="fname">Networks found:</label>
<br>
<select name="ssid">"#;

const PAGE_TAIL: &str = r#"</select>
<br>
<label for="ipass">Security key:</label><br>
<input type="password" name="ipass"><br>
<input type="submit" value="Submit">
</form>
</body>
</html>"#;

/// Page shown after the credential was saved.
pub const SAVED_PAGE: &str = "<html>\n<body>\n<p>Credentials saved. Restarting...</p>\n</body>\n</html>";

/// Render the network selection form for `networks`.
pub fn render_index(networks: &ScanResult) -> String {
    let mut html = String::with_capacity(PAGE_HEAD.len() + PAGE_TAIL.len() + networks.len() * 64);
    html.push_str(PAGE_HEAD);
    for ssid in networks.iter() {
        let escaped = escape_html(ssid);
        html.push_str("<option value=\"");
        html.push_str(&escaped);
        html.push_str("\">");
        html.push_str(&escaped);
        html.push_str("</option>");
    }
    html.push_str(PAGE_TAIL);
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

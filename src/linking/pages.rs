//! Browser-facing pages for the OAuth callback.

use axum::response::Html;

use super::types::Provider;

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #f5f6f8;
            color: #1c1e21;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
            margin: 0;
            padding: 20px;
            box-sizing: border-box;
        }
        .card {
            text-align: center;
            max-width: 420px;
            background: #fff;
            border-radius: 12px;
            padding: 32px;
            box-shadow: 0 2px 12px rgba(0, 0, 0, 0.08);
        }
        h1 { margin: 0 0 12px; font-size: 22px; }
        .ok { color: #1877f2; }
        .fail { color: #d93025; }
        .detail {
            background: #fdecea;
            padding: 10px 16px;
            border-radius: 8px;
            font-family: monospace;
            font-size: 14px;
        }
        p { color: #65676b; }
"#;

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="card">
{body}
    </div>
</body>
</html>"#
    ))
}

/// Shown when a link completes without a `return_to`.
pub fn connected_html(provider: Provider) -> Html<String> {
    let name = provider.display_name();
    page(
        &format!("{} connected", name),
        &format!(
            r#"        <h1 class="ok">{name} connected</h1>
        <p>Your {name} account is linked. You can close this window.</p>
        <script>
            if (window.opener) {{
                setTimeout(() => window.close(), 1500);
            }}
        </script>"#
        ),
    )
}

/// Shown when the callback fails.
pub fn error_html(message: &str) -> Html<String> {
    page(
        "Linking failed",
        &format!(
            r#"        <h1 class="fail">Something went wrong</h1>
        <div class="detail">{}</div>
        <p>Please close this window and try connecting again.</p>"#,
            escape(message)
        ),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

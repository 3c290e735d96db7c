//! Rendered frame as a browsable page.

use axum::{extract::State, response::Html};
use livepreview_core::{DiagnosticView, ErrorKind};
use std::sync::Arc;

use crate::AppState;

const STYLE: &str = "body{font-family:system-ui,sans-serif;margin:0}\
#root{padding:1rem}\
.preview-error{color:#b91c1c;background:#fef2f2;padding:.75rem;white-space:pre-wrap}\
.error-panel{position:fixed;bottom:0;left:0;right:0;margin:0;padding:.75rem 1rem;\
background:#7f1d1d;color:#fff;font-family:monospace;white-space:pre-wrap}\
.building{position:fixed;top:.5rem;right:.5rem;font-size:.8rem;color:#6b7280}";

/// GET /frame - HTML document wrapping the current frame
pub async fn get_frame(State(state): State<Arc<AppState>>) -> Html<String> {
    let (view, generation) = state
        .handle
        .with_state(|s| (s.diagnostics.clone(), s.generation.as_u64()));
    Html(render_document(&view, generation))
}

/// Wrap the frame markup in a standalone page, with the error panel and
/// building indicator drawn on top.
pub fn render_document(view: &DiagnosticView, generation: u64) -> String {
    let mut overlay = String::new();
    if view.building {
        overlay.push_str("<div class=\"building\">Building…</div>");
    }
    if let Some(error) = &view.error {
        let title = match error.kind {
            ErrorKind::Compile => "Compile error",
            ErrorKind::Runtime => "Runtime error",
        };
        overlay.push_str(&format!(
            "<pre class=\"error-panel\">{}: {}</pre>",
            title,
            escape_html(&error.message)
        ));
    }
    if let Some(code) = &view.artifact_text {
        overlay.push_str(&format!("<pre class=\"artifact\">{}</pre>", escape_html(code)));
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>livepreview</title>\n<style>{}</style>\n</head>\n\
         <body data-generation=\"{}\">\n<div id=\"root\">{}</div>\n{}\n</body>\n</html>\n",
        STYLE, generation, view.frame.html, overlay
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepreview_core::{DiagnosticState, ErrorPanel, Frame};

    fn view(html: &str) -> DiagnosticView {
        DiagnosticView {
            state: DiagnosticState::Ready,
            building: false,
            error: None,
            frame: Frame {
                html: html.to_string(),
                outline: String::new(),
            },
            show_artifact: false,
            artifact_text: None,
        }
    }

    #[test]
    fn test_document_embeds_frame() {
        let doc = render_document(&view("<div>ok</div>"), 3);
        assert!(doc.contains("<div id=\"root\"><div>ok</div></div>"));
        assert!(doc.contains("data-generation=\"3\""));
        assert!(!doc.contains("error-panel\">"));
    }

    #[test]
    fn test_document_escapes_error_panel() {
        let mut v = view("");
        v.state = DiagnosticState::RuntimeError("<b>boom</b>".to_string());
        v.error = Some(ErrorPanel {
            kind: ErrorKind::Runtime,
            message: "<b>boom</b>".to_string(),
        });
        let doc = render_document(&v, 1);
        assert!(doc.contains("Runtime error: &lt;b&gt;boom&lt;/b&gt;"));
    }
}

//! Repository graph rendering.

use std::fmt::Write;
use std::path::PathBuf;

use futures::future::BoxFuture;

use super::executor::run_git;
use crate::error::SessionError;

const BACKGROUND: &str = "#424242";
const FOREGROUND: &str = "#E0E0E0";
const LINE_HEIGHT: usize = 18;
const CHAR_WIDTH: usize = 8;
const PADDING: usize = 12;

/// Produces the rendered repository snapshot. Each call is a full render.
pub trait SnapshotRenderer: Send + Sync {
    fn render(&self) -> BoxFuture<'static, Result<String, SessionError>>;
}

/// Lays out `git log --graph` as an SVG text document.
#[derive(Clone, Debug)]
pub struct GitGraphRenderer {
    repository: PathBuf,
    limit: usize,
}

impl GitGraphRenderer {
    pub fn new(repository: PathBuf, limit: usize) -> Self {
        Self { repository, limit }
    }
}

impl SnapshotRenderer for GitGraphRenderer {
    fn render(&self) -> BoxFuture<'static, Result<String, SessionError>> {
        let repository = self.repository.clone();
        let limit = self.limit.to_string();
        Box::pin(async move {
            let output = run_git(
                &repository,
                &["log", "--graph", "--all", "--decorate", "--oneline", "-n", &limit],
            )
            .await?;
            Ok(graph_svg(&output))
        })
    }
}

/// One `<text>` row per output line on a solid background.
pub fn graph_svg(graph: &str) -> String {
    let lines: Vec<&str> = graph.lines().collect();
    let columns = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let width = columns * CHAR_WIDTH + PADDING * 2;
    let height = lines.len() * LINE_HEIGHT + PADDING * 2;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    );
    let _ = write!(svg, r#"<rect width="100%" height="100%" fill="{}"/>"#, BACKGROUND);
    let _ = write!(
        svg,
        r#"<g font-family="monospace" font-size="13" fill="{}" xml:space="preserve">"#,
        FOREGROUND
    );
    for (i, line) in lines.iter().enumerate() {
        let y = PADDING + (i + 1) * LINE_HEIGHT - 4;
        let _ = write!(svg, r#"<text x="{}" y="{}">{}</text>"#, PADDING, y, escape(line));
    }
    svg.push_str("</g></svg>");
    svg
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

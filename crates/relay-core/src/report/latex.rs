//! LaTeX document assembly and PDF compilation.
//!
//! The document is assembled from a handlebars template with all dynamic
//! text pre-escaped, then compiled by an external `tectonic` binary inside
//! a scoped temp directory. The directory (tex file, downloaded assets,
//! intermediates) is removed on every exit path, including errors.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;

/// Tail of tectonic output kept in error messages.
const LOG_TAIL_CHARS: usize = 8_000;

/// Escape the closed set of LaTeX-significant characters.
pub fn escape_latex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str(r"\textbackslash{}"),
            '{' => escaped.push_str(r"\{"),
            '}' => escaped.push_str(r"\}"),
            '#' => escaped.push_str(r"\#"),
            '%' => escaped.push_str(r"\%"),
            '&' => escaped.push_str(r"\&"),
            '_' => escaped.push_str(r"\_"),
            '^' => escaped.push_str(r"\textasciicircum{}"),
            '~' => escaped.push_str(r"\textasciitilde{}"),
            '$' => escaped.push_str(r"\$"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Normalize a requested font to one of the supported LaTeX font packages.
pub fn normalize_font(font: Option<&str>) -> &'static str {
    let Some(font) = font else {
        return "lmodern";
    };
    let lowered = font.trim().to_lowercase();
    if ["times", "newtx", "tx"].iter().any(|k| lowered.contains(k)) {
        "newtx"
    } else if ["palatino", "pazo"].iter().any(|k| lowered.contains(k)) {
        "palatino"
    } else if lowered.contains("libertine") {
        "libertine"
    } else {
        "lmodern"
    }
}

/// Style options pulled from a designer payload's `style` block.
#[derive(Debug, Clone)]
pub struct DocumentStyle {
    pub font: &'static str,
    pub author: String,
    pub date: String,
    pub abstract_text: String,
    pub page_border: bool,
    pub border_color: String,
    pub border_width: String,
    pub border_inset: String,
}

impl DocumentStyle {
    /// Extract and escape style fields. Free-form `instructions` /
    /// `formatting` strings are tolerated but not interpreted.
    pub fn from_payload(payload: &Value) -> Self {
        let style = payload.get("style").and_then(Value::as_object);
        let get = |key: &str| -> Option<&str> {
            style.and_then(|s| s.get(key)).and_then(Value::as_str)
        };

        Self {
            font: normalize_font(get("font")),
            author: escape_latex(get("author").unwrap_or("")),
            date: escape_latex(get("date").unwrap_or("")),
            abstract_text: escape_latex(get("abstract").unwrap_or("")),
            page_border: style
                .and_then(|s| s.get("page_border"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            border_color: get("border_color").unwrap_or("black").to_string(),
            border_width: get("border_width").unwrap_or("0.8pt").to_string(),
            border_inset: get("border_inset").unwrap_or("18pt").to_string(),
        }
    }
}

/// A section ready for the template: either escaped prose or a figure.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedSection {
    pub heading: String,
    pub is_image: bool,
    pub content: String,
    pub image_path: String,
    pub has_caption: bool,
    pub caption: String,
}

impl RenderedSection {
    pub fn text(heading: &str, content: &str) -> Self {
        Self {
            heading: escape_latex(heading),
            is_image: false,
            content: escape_latex(content),
            image_path: String::new(),
            has_caption: false,
            caption: String::new(),
        }
    }

    pub fn image(heading: &str, image_path: String, caption: Option<&str>) -> Self {
        let caption = caption.map(escape_latex).unwrap_or_default();
        Self {
            heading: escape_latex(heading),
            is_image: true,
            content: String::new(),
            image_path,
            has_caption: !caption.is_empty(),
            caption,
        }
    }
}

#[derive(Serialize)]
struct TemplateData<'a> {
    title: String,
    author: &'a str,
    date: &'a str,
    has_abstract: bool,
    abstract_text: &'a str,
    font_newtx: bool,
    font_palatino: bool,
    font_libertine: bool,
    page_border: bool,
    border_color: &'a str,
    border_width: &'a str,
    border_inset: &'a str,
    sections: &'a [RenderedSection],
}

const LATEX_TEMPLATE: &str = r"\documentclass[11pt]{article}
\usepackage[margin=1in]{geometry}
\usepackage{graphicx}
\usepackage{hyperref}
\usepackage{xcolor}
\usepackage{booktabs}
\usepackage{array}
\usepackage{microtype}
\usepackage{setspace}
\usepackage{enumitem}
\usepackage{float}
\usepackage{caption}
\usepackage{tikz}
\usepackage{eso-pic}

{{#if font_newtx}}
\usepackage{newtxtext}
\usepackage{newtxmath}
{{else}}{{#if font_palatino}}
\usepackage{mathpazo}
{{else}}{{#if font_libertine}}
\usepackage{libertine}
{{else}}
\usepackage{lmodern}
{{/if}}{{/if}}{{/if}}

\hypersetup{
  colorlinks=true,
  linkcolor=blue,
  urlcolor=blue,
  citecolor=blue
}

{{#if page_border}}
\AddToShipoutPictureBG{
  \begin{tikzpicture}[remember picture,overlay]
    \draw[line width={{border_width}}, color={{border_color}}]
      ([xshift={{border_inset}},yshift=-{{border_inset}}]current page.north west)
      rectangle
      ([xshift=-{{border_inset}},yshift={{border_inset}}]current page.south east);
  \end{tikzpicture}
}
{{/if}}

\title{\textbf{ {{title}} }}
\author{ {{author}} }
\date{ {{date}} }

\begin{document}
\maketitle

\onehalfspacing

{{#if has_abstract}}
\begin{abstract}
{{abstract_text}}
\end{abstract}
{{/if}}

{{#each sections}}
\section*{ {{heading}} }

{{#if is_image}}
\begin{figure}[H]
  \centering
  \includegraphics[width=0.95\linewidth]{ {{image_path}} }
  {{#if has_caption}}\caption{ {{caption}} }{{/if}}
\end{figure}
{{else}}
{{content}}
{{/if}}

{{/each}}

\end{document}
";

/// Assemble the LaTeX source for a report. `title` is escaped here;
/// sections and style fields arrive pre-escaped.
pub fn build_document(
    title: &str,
    style: &DocumentStyle,
    sections: &[RenderedSection],
) -> Result<String> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);

    let data = TemplateData {
        title: escape_latex(title),
        author: &style.author,
        date: &style.date,
        has_abstract: !style.abstract_text.is_empty(),
        abstract_text: &style.abstract_text,
        font_newtx: style.font == "newtx",
        font_palatino: style.font == "palatino",
        font_libertine: style.font == "libertine",
        page_border: style.page_border,
        border_color: &style.border_color,
        border_width: &style.border_width,
        border_inset: &style.border_inset,
        sections,
    };

    registry
        .render_template(LATEX_TEMPLATE, &data)
        .context("failed to render LaTeX template")
}

/// Compile LaTeX source to PDF bytes with tectonic.
///
/// `assets` are written under `assets/` in the build directory so the
/// template's `\includegraphics{assets/...}` paths resolve.
pub async fn compile_pdf(tex: &str, assets: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let dir = tempfile::tempdir().context("failed to create LaTeX temp dir")?;
    let assets_dir = dir.path().join("assets");
    std::fs::create_dir_all(&assets_dir).context("failed to create assets dir")?;

    for (name, bytes) in assets {
        std::fs::write(assets_dir.join(name), bytes)
            .with_context(|| format!("failed to write asset {name}"))?;
    }

    let tex_path = dir.path().join("main.tex");
    std::fs::write(&tex_path, tex).context("failed to write main.tex")?;

    let output = Command::new("tectonic")
        .arg("--synctex")
        .arg("--keep-logs")
        .arg("--keep-intermediates")
        .arg("--outdir")
        .arg(dir.path())
        .arg(&tex_path)
        .current_dir(dir.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to spawn tectonic -- is it installed and on PATH?")?;

    let pdf_path = dir.path().join("main.pdf");
    if !output.status.success() || !pdf_path.exists() {
        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        let tail_start = log.len().saturating_sub(LOG_TAIL_CHARS);
        bail!(
            "tectonic failed (status {:?}). Output:\n{}",
            output.status.code(),
            &log[tail_start..]
        );
    }

    std::fs::read(&pdf_path).context("failed to read compiled PDF")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn escapes_the_closed_character_set() {
        assert_eq!(
            escape_latex(r"100% of {costs} & _more_ for $5 #1 ^ ~ \"),
            r"100\% of \{costs\} \& \_more\_ for \$5 \#1 \textasciicircum{} \textasciitilde{} \textbackslash{}"
        );
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(escape_latex("hello world 42"), "hello world 42");
    }

    #[test]
    fn font_normalization_recognizes_families() {
        assert_eq!(normalize_font(Some("Times New Roman")), "newtx");
        assert_eq!(normalize_font(Some("newtx")), "newtx");
        assert_eq!(normalize_font(Some("Palatino")), "palatino");
        assert_eq!(normalize_font(Some("mathpazo")), "palatino");
        assert_eq!(normalize_font(Some("Linux Libertine")), "libertine");
        assert_eq!(normalize_font(Some("Comic Sans")), "lmodern");
        assert_eq!(normalize_font(None), "lmodern");
    }

    #[test]
    fn document_contains_sections_and_escaped_title() {
        let style = DocumentStyle::from_payload(&json!({}));
        let sections = vec![
            RenderedSection::text("Intro & Scope", "50% done"),
            RenderedSection::image("Latency", "assets/artifact_1.png".to_string(), Some("p95 trend")),
        ];
        let tex = build_document("Q3 Report {draft}", &style, &sections).unwrap();

        assert!(tex.contains(r"Q3 Report \{draft\}"));
        assert!(tex.contains(r"\section*{ Intro \& Scope }"));
        assert!(tex.contains(r"50\% done"));
        assert!(tex.contains(r"\includegraphics[width=0.95\linewidth]{ assets/artifact_1.png }"));
        assert!(tex.contains(r"\caption{ p95 trend }"));
        assert!(tex.contains(r"\usepackage{lmodern}"));
        assert!(!tex.contains("AddToShipoutPictureBG"));
    }

    #[test]
    fn border_and_font_options_render() {
        let style = DocumentStyle::from_payload(&json!({
            "style": {
                "font": "times",
                "page_border": true,
                "border_color": "blue",
                "border_width": "1.2pt",
                "border_inset": "10pt",
                "author": "Ops Team",
                "abstract": "A summary."
            }
        }));
        let tex = build_document("Report", &style, &[RenderedSection::text("A", "b")]).unwrap();

        assert!(tex.contains(r"\usepackage{newtxtext}"));
        assert!(!tex.contains(r"\usepackage{lmodern}"));
        assert!(tex.contains("line width=1.2pt, color=blue"));
        assert!(tex.contains("xshift=10pt"));
        assert!(tex.contains(r"\begin{abstract}"));
        assert!(tex.contains("Ops Team"));
    }

    #[test]
    fn image_without_caption_omits_caption_macro() {
        let style = DocumentStyle::from_payload(&json!({}));
        let sections = vec![RenderedSection::image("Chart", "assets/a.png".to_string(), None)];
        let tex = build_document("R", &style, &sections).unwrap();
        assert!(!tex.contains(r"\caption"));
    }
}

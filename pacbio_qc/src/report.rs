//! HTML reports: one summary page per sample and the run dashboard

use std::{fmt::Write as _, fs, path::Path};

use anyhow::Context;
use serde_json::Value;

use crate::{
    config::Config,
    output::write_text,
    stats::{Histogram, SampleSummary},
    summary::{RunInfo, SampleTable},
};

const STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
h1{font-size:1.6em}h2{font-size:1.2em;border-bottom:1px solid #ccc;padding-bottom:.2em}\
table{border-collapse:collapse;margin:1em 0}\
th,td{border:1px solid #ccc;padding:.3em .8em;text-align:right}\
th{background:#eef}td:first-child,th:first-child{text-align:left}\
.kraken{border:1px solid #ccc;padding:1em}";

pub fn escape(s: &str) -> String {
    let mut t = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => t.push_str("&amp;"),
            '<' => t.push_str("&lt;"),
            '>' => t.push_str("&gt;"),
            '"' => t.push_str("&quot;"),
            '\'' => t.push_str("&#39;"),
            _ => t.push(c),
        }
    }
    t
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n<h1>{}</h1>\n{}</body>\n</html>\n",
        escape(title),
        STYLE,
        escape(title),
        body
    )
}

/// Table with a header row.  Cells are inserted as is so must already be escaped
fn table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut s = String::from("<table>\n<thead><tr>");
    for h in headers {
        let _ = write!(s, "<th>{}</th>", escape(h));
    }
    s.push_str("</tr></thead>\n<tbody>\n");
    for r in rows {
        s.push_str("<tr>");
        for c in r {
            let _ = write!(s, "<td>{}</td>", c);
        }
        s.push_str("</tr>\n");
    }
    s.push_str("</tbody>\n</table>\n");
    s
}

/// Display form of a (possibly uncoerced) JSON value
pub fn format_value(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => escape(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => escape(&v.to_string()),
    }
}

fn fmt_opt(x: Option<f64>) -> String {
    x.map(|y| format!("{:.2}", y))
        .unwrap_or_else(|| "-".to_string())
}

/// Bar chart of a histogram as inline SVG
fn svg_histogram(title: &str, xlabel: &str, h: &Histogram) -> String {
    let (w, ht, margin) = (480.0, 200.0, 30.0);
    let max = h.counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return format!("<p>{}: no data</p>\n", escape(title));
    }
    let n = h.counts.len() as f64;
    let bw = (w - 2.0 * margin) / n;
    let mut s = String::new();
    let _ = writeln!(
        s,
        "<figure>\n<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" role=\"img\" aria-label=\"{}\">",
        w,
        ht + 2.0 * margin,
        escape(title)
    );
    for (i, c) in h.counts.iter().enumerate() {
        let bh = ht * (*c as f64) / (max as f64);
        let _ = writeln!(
            s,
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"#4477aa\"><title>{}: {}</title></rect>",
            margin + bw * i as f64,
            margin + ht - bh,
            bw.max(1.0),
            bh,
            h.bins[i],
            c
        );
    }
    let (lo, hi) = (
        h.bins.first().copied().unwrap_or(0.0),
        h.bins.last().copied().unwrap_or(0.0),
    );
    let _ = writeln!(
        s,
        "<text x=\"{}\" y=\"{}\" font-size=\"10\">{}</text><text x=\"{}\" y=\"{}\" font-size=\"10\" text-anchor=\"end\">{}</text>",
        margin,
        ht + 2.0 * margin - 8.0,
        lo,
        w - margin,
        ht + 2.0 * margin - 8.0,
        hi
    );
    let _ = writeln!(
        s,
        "</svg>\n<figcaption>{} ({}; max count {})</figcaption>\n</figure>",
        escape(title),
        escape(xlabel),
        max
    );
    s
}

/// Body of the kraken output, or the whole file if it is not a complete HTML document
fn html_body(s: &str) -> &str {
    let lower = s.to_ascii_lowercase();
    match (lower.find("<body"), lower.rfind("</body>")) {
        (Some(a), Some(b)) if a < b => match lower[a..].find('>') {
            Some(c) if a + c + 1 <= b => &s[a + c + 1..b],
            _ => s,
        },
        _ => s,
    }
}

fn read_sample_summary(p: &Path) -> anyhow::Result<SampleSummary> {
    let s = fs::read_to_string(p).with_context(|| format!("Could not read {}", p.display()))?;
    serde_json::from_str(&s)
        .with_context(|| format!("Could not parse sample summary from {}", p.display()))
}

/// Assemble {sample}/summary.html from the QC JSON and, when enabled, the
/// taxonomic classification
pub fn sample_report(cfg: &Config, sample: &str) -> anyhow::Result<()> {
    let summary = read_sample_summary(&cfg.qc_json(sample))?;
    let r = &summary.read_stats;

    let mut body = String::new();
    body.push_str("<h2>Read statistics</h2>\n");
    let rows: Vec<Vec<String>> = vec![
        vec!["Number of reads".into(), r.count.to_string()],
        vec!["Number of bases".into(), r.nb_bases.to_string()],
        vec!["Mean read length".into(), format!("{:.2}", r.mean)],
        vec!["Read length std".into(), format!("{:.2}", r.std)],
        vec!["Min read length".into(), r.min.to_string()],
        vec!["25% read length".into(), format!("{:.2}", r.q25)],
        vec!["Median read length".into(), format!("{:.2}", r.q50)],
        vec!["75% read length".into(), format!("{:.2}", r.q75)],
        vec!["Max read length".into(), r.max.to_string()],
        vec!["Mean GC (%)".into(), format!("{:.2}", r.mean_gc)],
        vec!["Mean passes".into(), fmt_opt(r.mean_passes)],
        vec!["Mean read quality".into(), fmt_opt(r.mean_rq)],
    ];
    body.push_str(&table(&["Statistic".into(), "Value".into()], &rows));

    body.push_str("<h2>Distributions</h2>\n");
    body.push_str(&svg_histogram(
        "Read length",
        "bases",
        &summary.hist_read_length,
    ));
    body.push_str(&svg_histogram("GC content", "%", &summary.hist_gc));
    body.push_str(&svg_histogram("Number of passes", "passes", &summary.hist_passes));

    if cfg.kraken() {
        let p = cfg.kraken_html(sample);
        let k = fs::read_to_string(&p)
            .with_context(|| format!("Could not read Kraken report {}", p.display()))?;
        body.push_str("<h2>Taxonomic content</h2>\n");
        body.push_str("<p>Full report: <a href=\"kraken/kraken.html\">kraken/kraken.html</a></p>\n");
        let _ = writeln!(body, "<div class=\"kraken\">\n{}\n</div>", html_body(&k));
    }

    write_text(
        &cfg.sample_report(sample),
        &page(&format!("PacBio QC: {}", sample), &body),
    )
}

/// Render index.html from summary.json: general information and one row
/// per sample linking to the sample's own report
pub fn dashboard(cfg: &Config, info: &RunInfo) -> anyhow::Result<()> {
    let st = SampleTable::from_file(&cfg.summary_json())?;

    let mut body = String::new();
    body.push_str("<h2>General information</h2>\n");
    let rows: Vec<Vec<String>> = info
        .rows()
        .into_iter()
        .map(|(k, v)| vec![escape(k), escape(&v)])
        .collect();
    body.push_str(&table(&["".into(), "".into()], &rows));

    body.push_str("<h2>Samples</h2>\n");
    let mut headers = vec!["Sample".to_string()];
    headers.extend(st.columns.iter().cloned());
    let rows: Vec<Vec<String>> = st
        .rows
        .iter()
        .map(|(name, vals)| {
            let link = format!(
                "<a href=\"{}/summary.html\">{}</a>",
                escape(name),
                escape(name)
            );
            std::iter::once(link)
                .chain(vals.iter().map(format_value))
                .collect()
        })
        .collect();
    body.push_str(&table(&headers, &rows));
    if cfg.settings().multiqc.enabled {
        body.push_str(
            "<p>MultiQC report: <a href=\"multiqc/multiqc_report.html\">multiqc/multiqc_report.html</a></p>\n",
        );
    }

    debug!("Writing dashboard to {}", cfg.dashboard().display());
    write_text(&cfg.dashboard(), &page("PacBio QC summary", &body))
}

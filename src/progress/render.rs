use super::{RequestRecord, RequestStatus, StepStatus};
use std::fmt::Write;

/// Renders the operator status page. Pure function of the record history;
/// the markup keeps the `tr.request` / `#events-stack-<id>` structure the
/// page script navigates by.
pub fn status_page(records: &[RequestRecord]) -> String {
    let current = records
        .last()
        .filter(|record| record.status == RequestStatus::InProgress);
    let headline = match current {
        Some(record) => format!("provisioning request {}", escape(&record.id)),
        None => "waiting for requests".to_string(),
    };

    let mut page = String::new();
    page.push_str(HEADER);
    let _ = write!(page, "<h1 class=\"status\">{headline}</h1>\n");

    page.push_str("<table class=\"requests\">\n");
    page.push_str("<tr><th>request</th><th>started</th><th>status</th><th>reason</th></tr>\n");
    for record in records.iter().rev() {
        let _ = write!(
            page,
            "<tr class=\"request req-{}\" id=\"request-{}\" data-stack=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            record.status.as_str(),
            escape(&record.id),
            escape(&record.id),
            escape(&record.id),
            escape(&record.started_at),
            record.status.as_str(),
            escape(record.reason.as_deref().unwrap_or("")),
        );
    }
    page.push_str("</table>\n");

    for record in records.iter().rev() {
        let _ = write!(
            page,
            "<div class=\"events\" id=\"events-stack-{}\">\n<table>\n",
            escape(&record.id)
        );
        for step in &record.steps {
            let _ = write!(
                page,
                "<tr class=\"event-header event-{}\"><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                step.status.as_str(),
                escape(&step.time),
                escape(&step.title),
                step.status.as_str(),
            );
            if let Some(result) = &step.result {
                let _ = write!(
                    page,
                    "<tr class=\"collapse out\"><td colspan=\"3\"><pre>{}</pre></td></tr>\n",
                    escape(&result.to_string()),
                );
            }
        }
        page.push_str("</table>\n</div>\n");
    }

    page.push_str(FOOTER);
    page
}

/// Rendered over the status page when a fatal fault escapes the main loop,
/// so the operator surface never goes stale silently.
pub fn crash_page(fault: &str) -> String {
    let mut page = String::new();
    page.push_str(HEADER);
    page.push_str("<h1 class=\"status crash\">worker stopped</h1>\n");
    let _ = write!(page, "<pre class=\"fault\">{}</pre>\n", escape(fault));
    page.push_str(FOOTER);
    page
}

const HEADER: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<meta http-equiv=\"refresh\" content=\"5\">\n<title>provisiond</title>\n</head>\n<body>\n";
const FOOTER: &str = "</body>\n</html>\n";

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

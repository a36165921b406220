//! CSV export of newsletter subscribers.

use chrono::{DateTime, NaiveDate, Utc};

use super::Subscriber;

const HEADER: [&str; 3] = ["Email", "Date", "Status"];
const ACTIVE: &str = "Active";

/// Render subscribers as CSV, oldest sign-up first
pub fn subscribers_csv(subscribers: &[Subscriber]) -> String {
    let mut sorted: Vec<&Subscriber> = subscribers.iter().collect();
    sorted.sort_by(|a, b| {
        a.subscribed_at
            .cmp(&b.subscribed_at)
            .then_with(|| a.email.cmp(&b.email))
    });

    let mut out = String::new();
    push_row(&mut out, &HEADER);
    for sub in sorted {
        let date = format_date(sub.subscribed_at);
        push_row(&mut out, &[sub.email.as_str(), date.as_str(), ACTIVE]);
    }
    out
}

/// Download name for an export taken on `day`
pub fn export_file_name(day: NaiveDate) -> String {
    format!("subscribers_{}.csv", day.format("%Y-%m-%d"))
}

fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn push_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push_str("\r\n");
}

// RFC 4180: quote fields holding separators, quotes or line breaks
fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

//! Notification body rendering.
//!
//! Turns a record into a heading plus a bullet list. Lines appear in a fixed
//! order and only for fields that resolve to a non-blank value; the equipment
//! code and the withdrawal quantity are the only lines that fall back to a
//! literal `-`. Rendering is a pure function of its inputs.

use chrono::{FixedOffset, NaiveDate};

use assetmail_common::Record;
use assetmail_common::record::fields;
use assetmail_common::time::{days_until, format_date};

/// Placeholder for the few always-shown fields.
const DASH: &str = "-";

const FOOTER: &str = "This email was sent automatically by the Asset Management system.";

/// Per-source display policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Omit the equipment-code line entirely.
    pub hide_equipment_code: bool,
    /// Label the type/model line from "model", falling back to "type".
    pub prefer_model: bool,
}

/// Calendar inputs: today's date and the zone dates are displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    pub today: NaiveDate,
    pub zone: FixedOffset,
}

pub fn render_html(
    record: &Record,
    title: &str,
    options: RenderOptions,
    ctx: &RenderContext,
) -> String {
    let items: String = body_lines(record, options, ctx)
        .iter()
        .map(|line| format!("<li>{}</li>", line))
        .collect();

    format!(
        concat!(
            "<div style=\"font-family:Arial,sans-serif;font-size:14px;color:#222\">",
            "<h2 style=\"color:#002366;margin:0 0 8px\">{}</h2>",
            "<ul>{}</ul>",
            "<p style=\"margin-top:12px;color:#888\">{}</p>",
            "</div>"
        ),
        escape_html(title),
        items,
        FOOTER
    )
}

/// The `<li>` contents, in display order.
pub fn body_lines(record: &Record, options: RenderOptions, ctx: &RenderContext) -> Vec<String> {
    let mut lines = Vec::new();
    let push_text = |label: &str, keys: &[&str], lines: &mut Vec<String>| {
        if let Some(value) = record.text(keys) {
            lines.push(labelled(label, &value));
        }
    };

    push_text("Borrower / responsible", fields::BORROWER, &mut lines);
    push_text("Team / department", fields::TEAM, &mut lines);
    push_text("Equipment", fields::EQUIPMENT, &mut lines);
    push_text("Brand", fields::BRAND, &mut lines);

    let type_or_model = if options.prefer_model {
        record.text(fields::MODEL).or_else(|| record.text(fields::TYPE))
    } else {
        record.text(fields::TYPE).or_else(|| record.text(fields::MODEL))
    };
    if let Some(value) = type_or_model {
        lines.push(labelled("Type / model", &value));
    }

    push_text("Serial", fields::SERIAL, &mut lines);
    push_text("Location", fields::LOCATION, &mut lines);

    if !options.hide_equipment_code {
        let code = record
            .text(fields::EQUIPMENT_CODE)
            .unwrap_or_else(|| DASH.to_string());
        lines.push(labelled("Equipment code", &code));
    }

    if let Some(line) = date_line("Perform date (latest)", record, fields::LATEST_CAL, ctx) {
        lines.push(line);
    }
    if record.has(fields::NEXT_CAL) {
        let mut line = date_line("Due date (next)", record, fields::NEXT_CAL, ctx)
            .unwrap_or_default();
        if let Some(due) = record.timestamp(fields::NEXT_CAL, &ctx.zone) {
            let left = days_until(due, ctx.today, &ctx.zone);
            line.push_str(&format!(" (<b>{} days remaining</b>)", left));
        }
        lines.push(line);
    }
    if let Some(line) = date_line("Borrowed on", record, fields::BORROW_DATE, ctx) {
        lines.push(line);
    }
    if let Some(line) = date_line("Return by", record, fields::RETURN_DATE, ctx) {
        lines.push(line);
    }

    push_text("Item", fields::ITEM, &mut lines);
    push_text("Requester", fields::REQUESTER, &mut lines);
    if record.has(fields::TAKEN) || record.has(fields::TOTAL) {
        let taken = record.text(fields::TAKEN).unwrap_or_else(|| DASH.to_string());
        let total = record.text(fields::TOTAL).unwrap_or_else(|| DASH.to_string());
        lines.push(format!(
            "Quantity taken: <b>{}</b> of total: <b>{}</b>",
            escape_html(&taken),
            escape_html(&total)
        ));
    }

    if let Some(line) = date_line("Withdrawn on", record, fields::WITHDRAWN_AT, ctx) {
        lines.push(line);
    }
    if let Some(line) = date_line("Recorded on", record, fields::RECORDED_AT, ctx) {
        lines.push(line);
    }

    lines
}

fn labelled(label: &str, value: &str) -> String {
    format!("{}: <b>{}</b>", label, escape_html(value))
}

/// `None` when the field is absent; a present value that is not a date
/// renders as `-`.
fn date_line(label: &str, record: &Record, keys: &[&str], ctx: &RenderContext) -> Option<String> {
    if !record.has(keys) {
        return None;
    }
    let shown = record
        .timestamp(keys, &ctx.zone)
        .map(|ts| format_date(ts, &ctx.zone))
        .unwrap_or_else(|| DASH.to_string());
    Some(labelled(label, &shown))
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

//! Human-readable result rendering: SI-scaled rates and the summary table.

use tabled::builder::Builder;
use tabled::settings::Style;

/// Widest code label the table will print.
const CODE_WIDTH: usize = 62;

/// One summary table row.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub code: String,
    pub concurrency: usize,
    pub qps: f64,
}

/// Format a rate with base-1000 Ki/Mi/Gi suffixes and three significant
/// digits.
pub fn format_qps(qps: f64) -> String {
    let qps = if qps.is_finite() && qps > 0.0 { qps } else { 0.0 };
    let (scaled, suffix) = if qps >= 1.0e9 {
        (qps / 1.0e9, " Gi")
    } else if qps >= 1.0e6 {
        (qps / 1.0e6, " Mi")
    } else if qps >= 1.0e3 {
        (qps / 1.0e3, " Ki")
    } else {
        (qps, "")
    };
    format!("{}{suffix}", three_digits(scaled))
}

fn three_digits(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else if value >= 100.0 {
        format!("{value:.0}")
    } else if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    }
}

/// Truncate a code label to the table's column width.
pub fn truncate_code(code: &str) -> String {
    code.chars().take(CODE_WIDTH).collect()
}

/// Render the summary table, sorted by QPS descending. The relative column
/// appears when more than one workload ran; percentages are normalized to
/// the peak.
pub fn render_table(rows: &[ReportRow]) -> String {
    let mut rows: Vec<ReportRow> = rows.to_vec();
    rows.sort_by(|a, b| b.qps.total_cmp(&a.qps));
    let relative = rows.len() > 1;
    let peak = rows.first().map(|row| row.qps).unwrap_or(0.0);

    let mut builder = Builder::default();
    let mut header = vec!["Code".to_string(), "||".to_string(), "QPS".to_string()];
    if relative {
        header.push("Rel%".to_string());
    }
    builder.push_record(header);
    for row in &rows {
        let mut record =
            vec![truncate_code(&row.code), row.concurrency.to_string(), format_qps(row.qps)];
        if relative {
            let rel = if peak > 0.0 { (row.qps / peak * 100.0).round() } else { 0.0 };
            record.push(format!("{rel:.0}%"));
        }
        builder.push_record(record);
    }
    let mut table = builder.build();
    table.with(Style::psql());
    table.to_string()
}

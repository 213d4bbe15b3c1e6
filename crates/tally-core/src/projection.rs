//! Read-only views of the ledger for reporting.

use crate::ledger::records_on;
use crate::types::AttendanceRecord;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// One row of today's attendance table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardRow {
    /// 1-based position in timestamp order.
    pub index: usize,
    pub name: String,
    pub time_arrival: String,
    pub status: String,
    pub timestamp: String,
    /// Stored snapshot path, present only when the file still exists.
    pub snapshot_url: Option<String>,
}

/// Project today's records (relative to `now`) into dashboard rows.
pub fn dashboard_rows(
    records: Vec<AttendanceRecord>,
    now: NaiveDateTime,
    snapshot_exists: impl Fn(&Path) -> bool,
) -> Vec<DashboardRow> {
    records_on(records, now)
        .into_iter()
        .enumerate()
        .map(|(i, r)| DashboardRow {
            index: i + 1,
            timestamp: r.timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            snapshot_url: r
                .snapshot_path
                .filter(|p| snapshot_exists(Path::new(p))),
            status: r.status.to_string(),
            time_arrival: r.time_arrival,
            name: r.name,
        })
        .collect()
}

/// Write rows as CSV with a header line.
pub fn write_csv<W: Write>(rows: &[DashboardRow], writer: W) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["#", "Name", "Time Arrival", "Status", "Timestamp", "Snapshot"])?;
    for row in rows {
        out.write_record([
            row.index.to_string().as_str(),
            &row.name,
            &row.time_arrival,
            &row.status,
            &row.timestamp,
            row.snapshot_url.as_deref().unwrap_or(""),
        ])?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn sample() -> Vec<AttendanceRecord> {
        vec![
            AttendanceRecord::new(
                "Grace Hopper",
                at(19, 9, 30, 0),
                Status::Present,
                Some("data/snapshots/Grace_Hopper_20261019_093000.jpg".into()),
            ),
            AttendanceRecord::new("Ada Lovelace", at(18, 8, 0, 0), Status::Present, None),
            AttendanceRecord::new(
                "Unknown",
                at(19, 8, 15, 2),
                Status::UnknownLogged,
                Some("data/unknown_faces_detected/gone.jpg".into()),
            ),
        ]
    }

    #[test]
    fn test_rows_are_today_only_in_time_order() {
        let rows = dashboard_rows(sample(), at(19, 12, 0, 0), |p| {
            !p.to_string_lossy().contains("gone")
        });

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].name, "Unknown");
        assert_eq!(rows[0].status, "Unknown - Logged");
        assert_eq!(rows[0].timestamp, "2026-10-19T08:15:02");
        assert!(rows[0].snapshot_url.is_none());

        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[1].time_arrival, "09:30:00");
        assert_eq!(
            rows[1].snapshot_url.as_deref(),
            Some("data/snapshots/Grace_Hopper_20261019_093000.jpg")
        );
    }

    #[test]
    fn test_empty_day() {
        assert!(dashboard_rows(sample(), at(20, 7, 0, 0), |_| true).is_empty());
    }

    #[test]
    fn test_csv_export() {
        let rows = dashboard_rows(sample(), at(19, 12, 0, 0), |_| true);
        let mut buf = Vec::new();
        write_csv(&rows, &mut buf).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "#,Name,Time Arrival,Status,Timestamp,Snapshot");
        assert_eq!(
            lines[1],
            "1,Unknown,08:15:02,Unknown - Logged,2026-10-19T08:15:02,data/unknown_faces_detected/gone.jpg"
        );
        assert_eq!(lines.len(), 3);
    }
}

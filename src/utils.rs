/// Utility functions
use crate::domain::{FlightRecord, FlightView};
use std::collections::HashSet;

const MISSING: &str = "---";

/// Split board time strings like `08|12 19:30` into (`08/12`, `19:30`)
pub fn split_date_time(raw: &str) -> (String, String) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (String::new(), String::new());
    }

    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() >= 2 {
        return (parts[0].replace('|', "/"), parts[1].to_string());
    }

    if raw.contains('/') || raw.contains('|') {
        (raw.replace('|', "/"), String::new())
    } else {
        (String::new(), raw.to_string())
    }
}

/// Pick the first non-empty string
pub fn s_pick<'a>(values: &[&'a str]) -> Option<&'a str> {
    values.iter().copied().find(|v| !v.trim().is_empty())
}

fn or_missing(value: &str) -> String {
    s_pick(&[value]).unwrap_or(MISSING).trim().to_string()
}

/// Flatten a record for API consumers
pub fn to_view(record: &FlightRecord) -> FlightView {
    let (scheduled_date, scheduled) = split_date_time(&record.scheduled);
    let (estimated_date, estimated) = split_date_time(&record.estimated);
    let (actual_date, actual) = split_date_time(&record.actual);

    FlightView {
        flight: or_missing(&record.designator()),
        place: or_missing(&record.location),
        date: s_pick(&[scheduled_date.as_str(), estimated_date.as_str(), actual_date.as_str()])
            .unwrap_or_default()
            .to_string(),
        scheduled,
        estimated,
        actual,
        registration: or_missing(&record.registration),
        position: or_missing(&record.position),
        gate_or_belt: or_missing(&record.gate_or_belt),
        status: record.remark.trim().to_string(),
    }
}

fn pad_position(position: &str) -> String {
    format!("{:0>2}", position.trim())
}

/// Keep records parked at any of `positions`.
///
/// Requests are zero-padded (`"5"` matches stand `"05"`); the board's stand is only trimmed.
pub fn filter_by_positions<'a, I>(records: I, positions: &[String]) -> Vec<FlightRecord>
where
    I: IntoIterator<Item = &'a FlightRecord>,
{
    let wanted: HashSet<String> = positions.iter().map(|p| pad_position(p)).collect();
    records
        .into_iter()
        .filter(|r| wanted.contains(r.position.trim()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;

    fn record(position: &str) -> FlightRecord {
        let mut r = FlightRecord::new(Direction::Arrival);
        r.airline = "AR".into();
        r.number = "1303".into();
        r.position = position.into();
        r
    }

    #[test]
    fn test_split_date_time_full() {
        assert_eq!(
            split_date_time("08|12 19:30"),
            ("08/12".to_string(), "19:30".to_string())
        );
    }

    #[test]
    fn test_split_date_time_only_time() {
        assert_eq!(split_date_time("19:30"), (String::new(), "19:30".to_string()));
    }

    #[test]
    fn test_split_date_time_only_date() {
        assert_eq!(split_date_time("08|12"), ("08/12".to_string(), String::new()));
    }

    #[test]
    fn test_split_date_time_empty() {
        assert_eq!(split_date_time("  "), (String::new(), String::new()));
    }

    #[test]
    fn test_s_pick_skips_blank() {
        assert_eq!(s_pick(&["", " ", "x"]), Some("x"));
        assert_eq!(s_pick(&["", ""]), None);
    }

    #[test]
    fn test_to_view_uses_first_available_date() {
        let mut r = record("07");
        r.location = "Cordoba".into();
        r.estimated = "09|12 00:15".into();
        r.actual = "00:20".into();
        r.remark = "ATERRIZADO".into();

        let view = to_view(&r);
        assert_eq!(view.flight, "AR 1303");
        assert_eq!(view.place, "Cordoba");
        assert_eq!(view.date, "09/12");
        assert_eq!(view.scheduled, "");
        assert_eq!(view.estimated, "00:15");
        assert_eq!(view.actual, "00:20");
        assert_eq!(view.registration, "---");
        assert_eq!(view.status, "ATERRIZADO");
    }

    #[test]
    fn test_filter_by_positions_pads_requests_only() {
        let records = vec![record("05"), record("12"), record(" 07 "), record("7"), record("")];
        let kept = filter_by_positions(&records, &["5".to_string(), "07".to_string()]);
        let positions: Vec<_> = kept.iter().map(|r| r.position.trim()).collect();
        assert_eq!(positions, vec!["05", "07"]);
    }

    #[test]
    fn test_filter_by_positions_ignores_blank_request() {
        let records = vec![record(""), record("05")];
        assert!(filter_by_positions(&records, &[" ".to_string()]).is_empty());
    }
}

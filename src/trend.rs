use crate::credentials::Credentials;
use crate::scale::{Scale, Threshold};
use chrono::offset::LocalResult;
use chrono::{
    DateTime, Days, Duration, FixedOffset, Months, NaiveDate, NaiveTime, SecondsFormat, TimeZone,
    Utc,
};
use chrono_tz::Tz;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TREND_URL: &str = "https://api.sense.com/apiservice/api/v1/app/history/trends";

/// Failures of the single-shot trend fetch. Unlike the live path, these are
/// fatal to the invocation and surface to the caller; there is no retry.
#[derive(Debug, Error)]
pub enum TrendError {
    #[error("trend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("trend request returned status {0}")]
    Status(StatusCode),
    #[error("malformed trend response: {0}")]
    Shape(String),
    #[error("unknown monitor time zone {0:?}")]
    TimeZone(String),
}

/// One historical data point, in cumulative-energy units for its bin.
#[derive(Debug, Clone, Serialize)]
pub struct TrendRecord {
    /// Bin start.
    pub timestamp: DateTime<Utc>,
    pub scale: Scale,
    pub consumption: f64,
    /// Production after the noise-floor correction.
    pub production: f64,
    /// Production exactly as reported.
    pub production_raw: f64,
}

#[derive(Debug, Deserialize)]
struct TrendResponse {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    steps: usize,
    consumption: SeriesTotals,
    production: SeriesTotals,
}

#[derive(Debug, Deserialize)]
struct SeriesTotals {
    totals: Vec<f64>,
}

/// Fetch one aggregate window starting at `start` and reconstruct the dense
/// record sequence.
///
/// The response carries only `start`, `end`, a step count and two parallel
/// total arrays; per-record timestamps are derived here. All-zero bins are
/// placeholders the service pre-fills for time that has not elapsed yet and
/// are filtered out before the caller sees the sequence. Granularity is
/// enforced by the [`Scale`] type at the call boundary, so no unrecognized
/// value can reach the request.
pub async fn fetch_trend(
    http: &reqwest::Client,
    creds: &Credentials,
    scale: Scale,
    start: DateTime<Utc>,
    base_threshold_watts: f64,
) -> Result<Vec<TrendRecord>, TrendError> {
    let tz: Tz = creds
        .time_zone
        .parse()
        .map_err(|_| TrendError::TimeZone(creds.time_zone.clone()))?;

    let response = http
        .get(TREND_URL)
        .query(&[
            ("monitor_id", creds.monitor_id.to_string()),
            ("scale", scale.as_str().to_string()),
            ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("read_combined", "true".to_string()),
        ])
        .header(
            reqwest::header::AUTHORIZATION,
            format!("bearer {}", creds.token),
        )
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TrendError::Status(status));
    }
    let body: TrendResponse = response.json().await?;

    let threshold = Threshold::for_scale(base_threshold_watts, scale);
    build_records(body, scale, tz, &threshold)
}

fn build_records(
    response: TrendResponse,
    scale: Scale,
    tz: Tz,
    threshold: &Threshold,
) -> Result<Vec<TrendRecord>, TrendError> {
    let steps = response.steps;
    // The service has been seen declaring a step count that disagrees with
    // the arrays it sends; indexing blindly would panic, so check up front.
    if response.consumption.totals.len() != steps || response.production.totals.len() != steps {
        return Err(TrendError::Shape(format!(
            "steps={} but consumption has {} totals and production has {}",
            steps,
            response.consumption.totals.len(),
            response.production.totals.len()
        )));
    }

    let timestamps = derive_timestamps(&response, scale, tz)?;

    let mut records = Vec::with_capacity(steps);
    for (i, timestamp) in timestamps.into_iter().enumerate() {
        let consumption = response.consumption.totals[i];
        let raw = response.production.totals[i];
        if consumption == 0.0 && raw == 0.0 {
            // Placeholder bin for a window that has not elapsed yet.
            continue;
        }
        records.push(TrendRecord {
            timestamp,
            scale,
            consumption,
            production: threshold.apply(raw),
            production_raw: raw,
        });
    }
    Ok(records)
}

/// Hour and Day windows have uniform bins; Week and Month advance by
/// calendar days and Year by calendar months in the monitor's timezone, so
/// daylight-saving transitions never shift bin boundaries.
fn derive_timestamps(
    response: &TrendResponse,
    scale: Scale,
    tz: Tz,
) -> Result<Vec<DateTime<Utc>>, TrendError> {
    let steps = response.steps;
    if steps == 0 {
        return Ok(Vec::new());
    }

    match scale {
        Scale::Hour | Scale::Day => {
            let step = (response.end - response.start) / steps as i32;
            Ok((0..steps)
                .map(|i| (response.start + step * i as i32).with_timezone(&Utc))
                .collect())
        }
        Scale::Week | Scale::Month => {
            let first = response.start.with_timezone(&tz).date_naive();
            (0..steps)
                .map(|i| {
                    let date = first.checked_add_days(Days::new(i as u64)).ok_or_else(|| {
                        TrendError::Shape(format!("day offset {i} from {first} overflows"))
                    })?;
                    local_midnight(date, tz)
                })
                .collect()
        }
        Scale::Year => {
            let first = response.start.with_timezone(&tz).date_naive();
            (0..steps)
                .map(|i| {
                    let date = first
                        .checked_add_months(Months::new(i as u32))
                        .ok_or_else(|| {
                            TrendError::Shape(format!("month offset {i} from {first} overflows"))
                        })?;
                    local_midnight(date, tz)
                })
                .collect()
        }
    }
}

fn local_midnight(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, TrendError> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Midnight fell inside a DST gap; the day starts when clocks resume.
            match tz.from_local_datetime(&(naive + Duration::hours(1))) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    Ok(dt.with_timezone(&Utc))
                }
                LocalResult::None => Err(TrendError::Shape(format!(
                    "no valid local time for {date} in {tz}"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn response(start: &str, end: &str, consumption: Vec<f64>, production: Vec<f64>) -> TrendResponse {
        TrendResponse {
            start: start.parse().unwrap(),
            end: end.parse().unwrap(),
            steps: consumption.len(),
            consumption: SeriesTotals { totals: consumption },
            production: SeriesTotals { totals: production },
        }
    }

    fn no_floor() -> Threshold {
        Threshold::for_scale(0.0, Scale::Hour)
    }

    #[test]
    fn hour_bins_are_uniform_subdivisions_of_the_window() {
        let resp = response(
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00Z",
            vec![1.0, 2.0],
            vec![3.0, 4.0],
        );
        let records = build_records(resp, Scale::Hour, chrono_tz::UTC, &no_floor()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(records[1].timestamp, "2024-01-01T01:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(records[1].consumption, 2.0);
        assert_eq!(records[1].production, 4.0);
    }

    #[test]
    fn month_bins_advance_by_calendar_days_across_dst() {
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        // The US spring-forward transition was 2024-03-10 02:00 local.
        let resp = response(
            "2024-03-09T00:00:00-08:00",
            "2024-04-08T00:00:00-07:00",
            vec![1.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.0],
        );
        let records = build_records(resp, Scale::Month, tz, &no_floor()).unwrap();
        assert_eq!(records.len(), 3);

        for (i, record) in records.iter().enumerate() {
            let local = record.timestamp.with_timezone(&tz);
            assert_eq!(local.hour(), 0, "bin {i} must start at local midnight");
            assert_eq!(local.minute(), 0);
            assert_eq!(
                local.date_naive(),
                NaiveDate::from_ymd_opt(2024, 3, 9 + i as u32).unwrap()
            );
        }

        // Calendar days, not fixed durations: the UTC gaps differ by an hour.
        let gap0 = records[1].timestamp - records[0].timestamp;
        let gap1 = records[2].timestamp - records[1].timestamp;
        assert_eq!(gap0, Duration::hours(24));
        assert_eq!(gap1, Duration::hours(23));
    }

    #[test]
    fn year_bins_advance_by_calendar_months() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let resp = response(
            "2024-01-15T00:00:00-05:00",
            "2024-04-15T00:00:00-04:00",
            vec![1.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.0],
        );
        let records = build_records(resp, Scale::Year, tz, &no_floor()).unwrap();
        let dates: Vec<NaiveDate> = records
            .iter()
            .map(|r| r.timestamp.with_timezone(&tz).date_naive())
            .collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            ]
        );
    }

    #[test]
    fn all_zero_placeholder_bins_are_filtered() {
        let resp = response(
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00Z",
            vec![0.0, 0.0],
            vec![0.0, 0.0],
        );
        let records = build_records(resp, Scale::Hour, chrono_tz::UTC, &no_floor()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn a_bin_with_only_production_is_kept() {
        let resp = response(
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00Z",
            vec![0.0, 0.0],
            vec![0.0, 5.0],
        );
        let records = build_records(resp, Scale::Hour, chrono_tz::UTC, &no_floor()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].production, 5.0);
    }

    #[test]
    fn step_count_mismatch_is_a_shape_error() {
        let mut resp = response(
            "2024-01-01T00:00:00Z",
            "2024-01-01T03:00:00Z",
            vec![1.0, 1.0, 1.0],
            vec![1.0, 1.0, 1.0],
        );
        resp.production.totals.pop();
        let err = build_records(resp, Scale::Hour, chrono_tz::UTC, &no_floor()).unwrap_err();
        assert!(matches!(err, TrendError::Shape(_)), "got {err:?}");
    }

    #[test]
    fn threshold_is_applied_and_raw_is_retained() {
        let resp = response(
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00Z",
            vec![1.0, 1.0],
            vec![0.001, 0.002],
        );
        // Base 100 W at hour scale: floor = 100/1000/60 kWh.
        let threshold = Threshold::for_scale(100.0, Scale::Hour);
        let records = build_records(resp, Scale::Hour, chrono_tz::UTC, &threshold).unwrap();
        assert_eq!(records[0].production, 0.0);
        assert_eq!(records[0].production_raw, 0.001);
        assert_eq!(records[1].production, 0.002);
        assert_eq!(records[1].production_raw, 0.002);
    }

    #[test]
    fn an_empty_window_yields_no_records() {
        let resp = response("2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z", vec![], vec![]);
        let records = build_records(resp, Scale::Day, chrono_tz::UTC, &no_floor()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn fall_back_transition_uses_the_earlier_midnight() {
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        // 2024-11-03 02:00 local is the fall-back transition; midnight itself
        // is unambiguous, but the day is 25 hours long.
        let resp = response(
            "2024-11-02T00:00:00-07:00",
            "2024-11-05T00:00:00-08:00",
            vec![1.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.0],
        );
        let records = build_records(resp, Scale::Week, tz, &no_floor()).unwrap();
        let gap = records[2].timestamp - records[1].timestamp;
        assert_eq!(gap, Duration::hours(25));
    }
}

use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serializer;

pub const DEFAULT_LIMIT: i64 = 20;
pub const DEFAULT_OFFSET: i64 = 0;
pub const MAX_LIMIT: i64 = 100;

pub fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = Utc
        .from_utc_datetime(date)
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}

pub fn rand_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `limit`/`offset` query parameters. Anything that is not a non-negative
/// integer falls back to the default instead of failing the request; larger
/// limits are capped at `MAX_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn parse(limit: Option<&str>, offset: Option<&str>) -> Page {
        Page {
            limit: parse_non_negative(limit)
                .map(|limit| limit.min(MAX_LIMIT))
                .unwrap_or(DEFAULT_LIMIT),
            offset: parse_non_negative(offset).unwrap_or(DEFAULT_OFFSET),
        }
    }
}

impl Default for Page {
    fn default() -> Page {
        Page {
            limit: DEFAULT_LIMIT,
            offset: DEFAULT_OFFSET,
        }
    }
}

fn parse_non_negative(value: Option<&str>) -> Option<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_falls_back_to_defaults() {
        assert_eq!(Page::parse(None, None), Page::default());
        assert_eq!(Page::parse(Some("abc"), Some("xyz")), Page::default());
        assert_eq!(Page::parse(Some("-5"), Some("-1")), Page::default());
        assert_eq!(
            Page::parse(Some("2"), Some("10")),
            Page {
                limit: 2,
                offset: 10
            }
        );
    }

    #[test]
    fn page_limit_is_capped() {
        assert_eq!(Page::parse(Some("1000000"), None).limit, MAX_LIMIT);
        assert_eq!(Page::parse(Some("100"), None).limit, 100);
        assert_eq!(Page::parse(Some("0"), None).limit, 0);
    }

    #[test]
    fn rand_string_is_alphanumeric() {
        for len in [0, 10, 50] {
            let s = rand_string(len);
            assert_eq!(s.len(), len);
            assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn dates_serialize_as_rfc3339_millis() {
        #[derive(serde::Serialize)]
        struct Stamp {
            #[serde(serialize_with = "serialize_date")]
            at: NaiveDateTime,
        }
        let at = chrono::NaiveDate::from_ymd_opt(2018, 6, 1)
            .unwrap()
            .and_hms_milli_opt(12, 30, 5, 250)
            .unwrap();
        let json = serde_json::to_string(&Stamp { at }).unwrap();
        assert_eq!(json, r#"{"at":"2018-06-01T12:30:05.250Z"}"#);
    }
}

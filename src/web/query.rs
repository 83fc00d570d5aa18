use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use crate::model::{GroupId, LevelQuery, SiloId, SiloSelector, TimeWindow};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("invalid value '{value}' for '{param}'")]
    InvalidId { param: &'static str, value: String },
    #[error("invalid timestamp '{value}' for '{param}': expected YYYY-MM-DD or ISO-8601")]
    InvalidTimestamp { param: &'static str, value: String },
    #[error("'start' ({start}) is after 'end' ({end})")]
    InvertedWindow { start: String, end: String },
    #[error("only one '{0}' may be given")]
    Repeated(&'static str),
}

/// Which query parameter identifies the silos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorParam {
    SiloId,
    SiloNumber,
    SiloGroupId,
}

impl SelectorParam {
    pub fn name(&self) -> &'static str {
        match self {
            SelectorParam::SiloId => "silo_id",
            SelectorParam::SiloNumber => "silo_number",
            SelectorParam::SiloGroupId => "silo_group_id",
        }
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// Build a [`LevelQuery`] from raw `key=value` pairs.
///
/// Ids may repeat (`silo_id=1&silo_id=2`) or be comma separated
/// (`silo_id=1,2`). Empty `start`/`end` values count as absent.
pub fn parse_level_query(
    params: &[(String, String)],
    selector: SelectorParam,
) -> Result<LevelQuery, InputError> {
    let name = selector.name();
    let raw: Vec<&str> = params
        .iter()
        .filter(|(k, _)| k == name)
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if raw.is_empty() {
        return Err(InputError::MissingParameter(name));
    }

    let selector = match selector {
        SelectorParam::SiloId => SiloSelector::Ids(
            raw.iter()
                .map(|v| parse_number::<i64>(name, v).map(SiloId))
                .collect::<Result<_, _>>()?,
        ),
        SelectorParam::SiloNumber => SiloSelector::Numbers(
            raw.iter()
                .map(|v| parse_number::<u32>(name, v))
                .collect::<Result<_, _>>()?,
        ),
        SelectorParam::SiloGroupId => {
            if raw.len() > 1 {
                return Err(InputError::Repeated(name));
            }
            SiloSelector::Group(GroupId(parse_number::<i64>(name, raw[0])?))
        }
    };

    let start = single(params, "start")?
        .map(|v| parse_bound("start", v, Bound::Start))
        .transpose()?;
    let end = single(params, "end")?
        .map(|v| parse_bound("end", v, Bound::End))
        .transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(InputError::InvertedWindow {
                start: s.to_rfc3339(),
                end: e.to_rfc3339(),
            });
        }
    }

    Ok(LevelQuery {
        selector,
        window: TimeWindow::new(start, end),
    })
}

fn single<'a>(
    params: &'a [(String, String)],
    name: &'static str,
) -> Result<Option<&'a str>, InputError> {
    let mut values = params
        .iter()
        .filter(|(k, v)| k == name && !v.trim().is_empty())
        .map(|(_, v)| v.trim());
    let first = values.next();
    if values.next().is_some() {
        return Err(InputError::Repeated(name));
    }
    Ok(first)
}

fn parse_number<T: std::str::FromStr>(param: &'static str, value: &str) -> Result<T, InputError> {
    value.parse::<T>().map_err(|_| InputError::InvalidId {
        param,
        value: value.to_string(),
    })
}

/// Parse an inclusive window bound. A bare date covers the whole day: it
/// starts at midnight when used as `start` and ends at 23:59:59.999 when
/// used as `end`. Date-times without an offset are taken as UTC.
fn parse_bound(
    param: &'static str,
    value: &str,
    bound: Bound,
) -> Result<DateTime<Utc>, InputError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let naive = match bound {
            Bound::Start => date.and_hms_opt(0, 0, 0),
            Bound::End => date.and_hms_milli_opt(23, 59, 59, 999),
        };
        if let Some(naive) = naive {
            return Ok(naive.and_utc());
        }
    }
    Err(InputError::InvalidTimestamp {
        param,
        value: value.to_string(),
    })
}

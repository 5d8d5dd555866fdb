use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.to_offset(UtcOffset::UTC).format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

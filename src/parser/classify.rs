use crate::model::Record;

/// Placement formats the pipeline drops instead of storing.
pub fn is_non_processable(record: &Record) -> bool {
    record
        .format
        .as_deref()
        .is_some_and(|f| f.to_lowercase().contains("video"))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract;

    fn with_format(format: Option<&str>) -> Record {
        let mut record = extract("", "https://www.linkedin.com/ad-library/detail/1");
        record.format = format.map(str::to_string);
        record
    }

    #[test]
    fn video_formats_are_non_processable() {
        assert!(is_non_processable(&with_format(Some("Video Ad"))));
        assert!(is_non_processable(&with_format(Some("VIDEO carousel"))));
    }

    #[test]
    fn other_or_missing_formats_are_processable() {
        assert!(!is_non_processable(&with_format(None)));
        assert!(!is_non_processable(&with_format(Some("Single Image Ad"))));
    }
}

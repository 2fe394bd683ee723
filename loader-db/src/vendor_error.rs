/// The streaming-ingest library conflates data errors with environment
/// errors behind a single exception type. This whitelist of numeric codes
/// is the only signal available to tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum VendorErrorCode {
    #[strum(to_string = "INVALID_VALUE_ROW")]
    InvalidValueRow,
    #[strum(to_string = "INVALID_FORMAT_ROW")]
    InvalidFormatRow,
    #[strum(to_string = "MAX_ROW_SIZE_EXCEEDED")]
    MaxRowSizeExceeded,
    #[strum(to_string = "UNKNOWN_DATA_TYPE")]
    UnknownDataType,
    #[strum(to_string = "NULL_VALUE")]
    NullValue,
    #[strum(to_string = "NULL_OR_EMPTY_STRING")]
    NullOrEmptyString,
    #[strum(to_string = "OTHER({0})")]
    Other(i32),
}

impl VendorErrorCode {
    /// True for the whitelist of codes that indicate a malformed row rather
    /// than a broken environment.
    pub fn is_data_issue(&self) -> bool {
        matches!(
            self,
            VendorErrorCode::InvalidValueRow
                | VendorErrorCode::InvalidFormatRow
                | VendorErrorCode::MaxRowSizeExceeded
                | VendorErrorCode::UnknownDataType
                | VendorErrorCode::NullValue
                | VendorErrorCode::NullOrEmptyString
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("vendor error {code}: {message}")]
pub struct VendorError {
    pub code: VendorErrorCode,
    pub message: String,
}

impl VendorError {
    pub fn new(code: VendorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_whitelisted_codes_are_data_issues() {
        assert!(VendorErrorCode::InvalidFormatRow.is_data_issue());
        assert!(VendorErrorCode::NullOrEmptyString.is_data_issue());
        assert!(!VendorErrorCode::Other(500).is_data_issue());
    }

    #[test]
    fn codes_render_as_the_wire_names() {
        assert_eq!(VendorErrorCode::InvalidFormatRow.to_string(), "INVALID_FORMAT_ROW");
        assert_eq!(VendorErrorCode::Other(1234).to_string(), "OTHER(1234)");
    }
}

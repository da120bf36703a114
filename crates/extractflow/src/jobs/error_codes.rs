// crates/extractflow/src/jobs/error_codes.rs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    DbDeadlock,
    Serialization,
    RateLimit,
    DependencyDown,
    BadPayload,
    BadMessage,
    UnknownJob,
    PublishFailed,
    MaxDeliveriesExceeded,
    Unknown,
}

impl ErrorCode {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "TIMEOUT" => Self::Timeout,
            "DB_DEADLOCK" => Self::DbDeadlock,
            "SERIALIZATION" => Self::Serialization,
            "RATE_LIMIT" => Self::RateLimit,
            "DEPENDENCY_DOWN" => Self::DependencyDown,
            "BAD_PAYLOAD" => Self::BadPayload,
            "BAD_MESSAGE" => Self::BadMessage,
            "UNKNOWN_JOB" => Self::UnknownJob,
            "PUBLISH_FAILED" => Self::PublishFailed,
            "MAX_DELIVERIES_EXCEEDED" => Self::MaxDeliveriesExceeded,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::DbDeadlock => "DB_DEADLOCK",
            Self::Serialization => "SERIALIZATION",
            Self::RateLimit => "RATE_LIMIT",
            Self::DependencyDown => "DEPENDENCY_DOWN",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::BadMessage => "BAD_MESSAGE",
            Self::UnknownJob => "UNKNOWN_JOB",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::MaxDeliveriesExceeded => "MAX_DELIVERIES_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Dead-letter reason codes written by the consumer.
pub const NON_RETRYABLE: &str = "NON_RETRYABLE";
pub const MAX_ATTEMPTS_EXCEEDED: &str = "MAX_ATTEMPTS_EXCEEDED";

pub fn suggested_action(code: &str) -> &'static str {
    match ErrorCode::from_str(code) {
        ErrorCode::Timeout => {
            "Raise the extraction timeout or shorten the input. Check extractor latency."
        }
        ErrorCode::DbDeadlock | ErrorCode::Serialization => {
            "Retry is OK. Look for concurrent writers on the jobs table."
        }
        ErrorCode::RateLimit => "Back off. Lower consumer concurrency.",
        ErrorCode::DependencyDown => {
            "Retry later. Check the extraction dependency's health."
        }
        ErrorCode::BadPayload => {
            "Non-retryable. The submitted text could not be extracted; resubmit corrected input."
        }
        ErrorCode::BadMessage => {
            "Non-retryable. A producer published a message that is not {text, jobId} JSON."
        }
        ErrorCode::UnknownJob => {
            "Non-retryable. The message references a job with no record; check the producer writes the job first."
        }
        ErrorCode::PublishFailed => "Queue was unavailable at submission. Resubmit the text.",
        ErrorCode::MaxDeliveriesExceeded => {
            "Consumers kept abandoning this message. Check for crashes or lease timeouts shorter than extraction time."
        }
        ErrorCode::Unknown => {
            "Inspect error message + logs. Decide if retryable; add a mapping once understood."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_strings() {
        for code in [
            ErrorCode::Timeout,
            ErrorCode::BadPayload,
            ErrorCode::PublishFailed,
            ErrorCode::MaxDeliveriesExceeded,
        ] {
            assert_eq!(ErrorCode::from_str(code.as_str()), code);
        }
        assert_eq!(ErrorCode::from_str("  timeout "), ErrorCode::Timeout);
        assert_eq!(ErrorCode::from_str("nope"), ErrorCode::Unknown);
    }

    #[test]
    fn every_code_has_an_action() {
        assert!(suggested_action("UNKNOWN_JOB").contains("Non-retryable"));
        assert!(!suggested_action("whatever").is_empty());
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_level_wire_format() {
        assert_eq!(
            serde_json::to_string(&LoggingLevel::Info).unwrap(),
            "\"info\""
        );
        assert!(LoggingLevel::Warning > LoggingLevel::Info);
    }
}

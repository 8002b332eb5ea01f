use serde::{Deserialize, Serialize};

/// One decoded record emitted by the unpacker in `RECORDS` output mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Absolute package path, e.g. `/Lotus/Types/Game/Foo`
    pub path: String,
    /// Package contents as emitted by the unpacker
    pub package: serde_json::Value,
}

impl PackageRecord {
    /// Decodes a single output line. Rejects records whose `path` is empty.
    pub fn from_line(line: &[u8]) -> Result<Self, String> {
        let record: PackageRecord = serde_json::from_slice(line).map_err(|e| e.to_string())?;
        if record.path.is_empty() {
            return Err("record has an empty path".to_string());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_line_decodes_path_and_package() {
        let record = PackageRecord::from_line(br#"{"path":"/a","package":{"x":1}}"#).unwrap();
        assert_eq!(record.path, "/a");
        assert_eq!(record.package, json!({"x": 1}));
    }

    #[test]
    fn test_from_line_rejects_missing_fields() {
        assert!(PackageRecord::from_line(br#"{"path":"/a"}"#).is_err());
        assert!(PackageRecord::from_line(br#"{"package":{}}"#).is_err());
        assert!(PackageRecord::from_line(b"not json").is_err());
    }

    #[test]
    fn test_from_line_rejects_empty_path() {
        let err = PackageRecord::from_line(br#"{"path":"","package":null}"#).unwrap_err();
        assert!(err.contains("empty path"));
    }
}

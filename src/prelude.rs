pub type BatchSender = tokio::sync::mpsc::Sender<crate::message::Batch>;
pub type BatchReceiver = tokio::sync::mpsc::Receiver<crate::message::Batch>;

#[inline]
pub fn create_channel(size: usize) -> (BatchSender, BatchReceiver) {
    tokio::sync::mpsc::channel(size)
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub enum StringOrEnv {
    String(String),
    EnvironmentVariable {
        key: String,
        default_value: Option<String>,
    },
}

impl StringOrEnv {
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(inner) => Some(inner.clone()),
            Self::EnvironmentVariable { key, default_value } => std::env::var(key)
                .ok()
                .or(default_value.as_ref().map(String::from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StringOrEnv;

    #[derive(Debug, serde::Deserialize)]
    struct Example {
        value: StringOrEnv,
    }

    #[test]
    fn should_read_plain_string() {
        let example: Example = toml::from_str(r#"value = "hello""#).unwrap();
        assert_eq!(example.value.as_string().as_deref(), Some("hello"));
    }

    #[test]
    fn should_fallback_to_default_value() {
        let example: Example = toml::from_str(
            r#"value = { key = "BUZZ_INGEST_TEST_UNDEFINED_VARIABLE", default_value = "fallback" }"#,
        )
        .unwrap();
        assert_eq!(example.value.as_string().as_deref(), Some("fallback"));
    }

    #[test]
    fn should_be_empty_without_variable_or_default() {
        let example: Example =
            toml::from_str(r#"value = { key = "BUZZ_INGEST_TEST_UNDEFINED_VARIABLE" }"#).unwrap();
        assert!(example.value.as_string().is_none());
    }
}

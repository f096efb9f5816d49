//! 访问统计事件
//!
//! 生产端把一次跳转序列化成 JSON，放在 Stream 消息的 `statsRecord` 字段里。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StatsError};
use crate::stream::StreamEvent;

/// 承载统计事件的消息字段
pub const STATS_RECORD_FIELD: &str = "statsRecord";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub full_short_url: String,
    /// 访客标识（cookie）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv: Option<String>,
    /// 客户端 IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// 访问时间，缺省为处理时间
    #[serde(
        default,
        with = "event_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_date: Option<DateTime<Utc>>,
}

impl StatsRecord {
    pub fn new(full_short_url: impl Into<String>) -> Self {
        Self {
            full_short_url: full_short_url.into(),
            ..Default::default()
        }
    }

    /// 从 Stream 消息解码
    pub fn from_event(event: &StreamEvent) -> Result<Self> {
        let payload = event.field(STATS_RECORD_FIELD).ok_or_else(|| {
            StatsError::decode(format!(
                "Message {} has no '{}' field",
                event.id, STATS_RECORD_FIELD
            ))
        })?;
        Self::from_json(payload)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        let record: StatsRecord = serde_json::from_str(payload)
            .map_err(|e| StatsError::decode(format!("Invalid statsRecord payload: {}", e)))?;
        if record.full_short_url.trim().is_empty() {
            return Err(StatsError::decode("statsRecord.fullShortUrl is empty"));
        }
        Ok(record)
    }

    /// 序列化为 Stream 消息字段
    pub fn into_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![(
            STATS_RECORD_FIELD.to_string(),
            serde_json::to_string(self)?,
        )])
    }

    pub fn event_time_or_now(&self) -> DateTime<Utc> {
        self.current_date.unwrap_or_else(Utc::now)
    }

    pub fn visitor(&self) -> Option<&str> {
        non_blank(&self.uv)
    }

    pub fn client_ip(&self) -> Option<&str> {
        non_blank(&self.uip)
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `currentDate` 兼容毫秒时间戳和 RFC 3339 字符串，写出时统一为毫秒
mod event_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_i64(time.timestamp_millis()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Millis(ms)) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
            Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
            Some(Raw::Text(text)) => {
                if let Ok(ms) = text.trim().parse::<i64>() {
                    return DateTime::from_timestamp_millis(ms)
                        .map(Some)
                        .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms)));
                }
                DateTime::parse_from_rfc3339(text.trim())
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(D::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamId;

    #[test]
    fn test_decode_full_payload() {
        let record = StatsRecord::from_json(
            r#"{"fullShortUrl":"s.io/abc123","uv":"v1","uip":"1.2.3.4","browser":"Safari","os":"iOS","device":"Mobile","currentDate":1700000000000}"#,
        )
        .unwrap();

        assert_eq!(record.full_short_url, "s.io/abc123");
        assert_eq!(record.visitor(), Some("v1"));
        assert_eq!(record.client_ip(), Some("1.2.3.4"));
        assert_eq!(
            record.current_date.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_decode_rfc3339_and_missing_fields() {
        let record = StatsRecord::from_json(
            r#"{"fullShortUrl":"s.io/x","uv":"  ","currentDate":"2024-03-01T10:00:00+08:00"}"#,
        )
        .unwrap();

        assert_eq!(record.visitor(), None);
        assert_eq!(record.browser, None);
        assert_eq!(
            record.current_date.unwrap().to_rfc3339(),
            "2024-03-01T02:00:00+00:00"
        );
    }

    #[test]
    fn test_decode_rejects_missing_url() {
        assert!(StatsRecord::from_json(r#"{"uv":"v1"}"#).is_err());
        assert!(StatsRecord::from_json(r#"{"fullShortUrl":" "}"#).is_err());
        assert!(StatsRecord::from_json("not json").is_err());
    }

    #[test]
    fn test_event_round_trip() {
        let mut record = StatsRecord::new("s.io/abc");
        record.os = Some("Android".to_string());
        record.current_date = DateTime::from_timestamp_millis(1_700_000_000_123);

        let event = StreamEvent::new(StreamId::new(1, 0), record.into_fields().unwrap());
        assert_eq!(StatsRecord::from_event(&event).unwrap(), record);

        let empty = StreamEvent::new(StreamId::new(2, 0), vec![]);
        assert!(StatsRecord::from_event(&empty).is_err());
    }
}

//! Configuration for the orchestration root
//!
//! The persisted settings store lives outside the engine. It hands over a
//! [`CoreConfig`] once at construction, and afterwards delivers individual
//! key-change notifications; each one maps to exactly one setter call via
//! [`CallCore::apply_key_change`](crate::core::CallCore::apply_key_change).
//!
//! # Keys
//!
//! | key | setter |
//! |-----|--------|
//! | `media.codec-order` | [`CallCore::set_codecs`](crate::core::CallCore::set_codecs), value is a comma-separated codec list |
//! | `<protocol>.auto-answer` | `set_auto_answer` on that backend |
//! | `<protocol>.no-answer-delay` | `set_reject_delay`, value in seconds |
//! | `<protocol>.forward-uri` | `set_forward_uri`, empty clears it |
//! | `<protocol>.echo-cancellation` | `set_echo_cancellation` |
//! | `<protocol>.silence-detection` | `set_silence_detection` |
//! | `<protocol>.dtmf-mode` | `set_dtmf_mode` (`rfc4733`, `info`, `inband`) |
//! | `<protocol>.display-name` | `set_display_name` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecList;
use crate::core::CallCore;
use crate::error::{CoreError, CoreResult};
use crate::manager::DtmfMode;

/// Settings loaded once when the orchestrator is constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Persisted codec preference order, in the flat string form
    pub codec_order: Vec<String>,
    /// Capacity of the broadcast event channel
    pub event_channel_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            codec_order: Vec::new(),
            event_channel_capacity: 256,
        }
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec_order(mut self, codec_order: Vec<String>) -> Self {
        self.codec_order = codec_order;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

impl CallCore {
    /// Apply one key-change notification from the settings store
    ///
    /// `media.*` keys route to the orchestrator itself; every other key
    /// is `<protocol>.<setting>` and routes to that backend's setter.
    pub async fn apply_key_change(&self, key: &str, value: &str) -> CoreResult<()> {
        if key == "media.codec-order" {
            let entries: Vec<String> = value
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect();
            let mut list = CodecList::load(&entries)?;
            self.set_codecs(&mut list).await;
            return Ok(());
        }

        let Some((protocol, setting)) = key.split_once('.') else {
            return Err(CoreError::UnknownConfigurationKey { key: key.to_string() });
        };
        let manager = self
            .manager(protocol)
            .await
            .ok_or_else(|| CoreError::ManagerNotFound {
                protocol: protocol.to_string(),
            })?;

        match setting {
            "auto-answer" => manager.set_auto_answer(parse_bool(key, value)?),
            "no-answer-delay" => {
                manager.set_reject_delay(Duration::from_secs(parse_seconds(key, value)?))
            }
            "forward-uri" => {
                let uri = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                manager.set_forward_uri(uri);
            }
            "echo-cancellation" => manager.set_echo_cancellation(parse_bool(key, value)?),
            "silence-detection" => manager.set_silence_detection(parse_bool(key, value)?),
            "dtmf-mode" => manager.set_dtmf_mode(parse_dtmf_mode(key, value)?),
            "display-name" => manager.set_display_name(value.to_string()),
            _ => {
                return Err(CoreError::UnknownConfigurationKey { key: key.to_string() });
            }
        }
        tracing::debug!(%key, %value, "configuration key applied");
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> CoreResult<bool> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(CoreError::invalid_configuration(
            key,
            format!("expected a boolean, got {:?}", value),
        )),
    }
}

fn parse_seconds(key: &str, value: &str) -> CoreResult<u64> {
    value.parse::<u64>().map_err(|_| {
        CoreError::invalid_configuration(key, format!("expected seconds, got {:?}", value))
    })
}

fn parse_dtmf_mode(key: &str, value: &str) -> CoreResult<DtmfMode> {
    match value {
        "rfc4733" | "rtp" => Ok(DtmfMode::Rfc4733),
        "info" => Ok(DtmfMode::Info),
        "inband" | "in-band" => Ok(DtmfMode::InBand),
        _ => Err(CoreError::invalid_configuration(
            key,
            format!("unknown DTMF mode {:?}", value),
        )),
    }
}

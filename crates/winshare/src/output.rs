use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use winshare_session::{Avatar, Metadata, ResourceState, SessionEvents, StatusCode, WindowId};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One line of session activity.
#[derive(Debug, Serialize)]
pub struct EventRecord {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: String,
}

impl EventRecord {
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            channel: None,
            window: None,
            status: None,
            detail: None,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn channel(mut self, channel: u16) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn window(mut self, window: Option<WindowId>) -> Self {
        self.window = window;
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.code());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub fn print_event(record: &EventRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CHANNEL", "WINDOW", "STATUS", "DETAIL"])
                .add_row(vec![
                    record.event.to_string(),
                    optional(record.channel),
                    record
                        .window
                        .map(|window| format!("{window:#x}"))
                        .unwrap_or_default(),
                    optional(record.status),
                    record.detail.clone().unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = record.event.to_string();
            if let Some(channel) = record.channel {
                line.push_str(&format!(" channel={channel}"));
            }
            if let Some(window) = record.window {
                line.push_str(&format!(" window={window:#x}"));
            }
            if let Some(status) = record.status {
                line.push_str(&format!(" status={status}"));
            }
            if let Some(detail) = &record.detail {
                line.push_str(&format!(" {detail}"));
            }
            println!("{line}");
        }
    }
}

/// Prints every session callback as an [`EventRecord`].
#[derive(Debug, Clone, Copy)]
pub struct EventPrinter {
    format: OutputFormat,
}

impl EventPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn emit(&self, record: EventRecord) {
        print_event(&record, self.format);
    }
}

impl SessionEvents for EventPrinter {
    fn on_window_opened(&mut self, channel: u16) -> ResourceState {
        self.emit(EventRecord::new("window_opened").channel(channel));
        ResourceState::Ready
    }

    fn on_metadata(&mut self, channel: u16, metadata: &Metadata) {
        self.emit(
            EventRecord::new("metadata")
                .channel(channel)
                .detail(describe_metadata(metadata)),
        );
    }

    fn on_window_closed(&mut self, channel: u16) {
        self.emit(EventRecord::new("window_closed").channel(channel));
    }

    fn on_wall(&mut self, code: u16, text: &str) {
        self.emit(EventRecord::new("wall").detail(format!("[{code}] {text}")));
    }

    fn on_avatar(&mut self, avatar: &Avatar) {
        self.emit(
            EventRecord::new("avatar").detail(format!("{}x{}", avatar.width, avatar.height)),
        );
    }

    fn on_pointer(&mut self, position: Option<(u16, u16)>) {
        let detail = match position {
            Some((x, y)) => format!("{x},{y}"),
            None => "hidden".to_string(),
        };
        self.emit(EventRecord::new("pointer").detail(detail));
    }

    fn on_audio_opened(&mut self, audio: u16, video: u16) {
        self.emit(
            EventRecord::new("audio_opened")
                .channel(audio)
                .detail(format!("video={video}")),
        );
    }

    fn on_respawn(&mut self, token: u32) {
        self.emit(EventRecord::new("respawn").detail(token.to_string()));
    }

    fn on_status(&mut self, window: Option<WindowId>, status: StatusCode) {
        self.emit(
            EventRecord::new("status")
                .window(window)
                .status(status)
                .detail(status.description()),
        );
    }
}

pub fn describe_metadata(metadata: &Metadata) -> String {
    match metadata {
        Metadata::Transiency(0) => "transient_for=none".to_string(),
        Metadata::Transiency(parent) => format!("transient_for={parent}"),
        Metadata::Title(title) => format!("title={title:?}"),
        Metadata::WindowType(kind) => format!("window_type={}", char::from(kind.letter())),
        Metadata::Icon(image) => format!("icon=<{} bytes>", image.len()),
        Metadata::Other { kind, value } => format!("kind={kind} <{} bytes>", value.len()),
    }
}

fn optional(value: Option<u16>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_record_skips_absent_fields() {
        let record = EventRecord::new("window_opened").channel(3);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "window_opened");
        assert_eq!(json["channel"], 3);
        assert!(json.get("window").is_none());
        assert!(json.get("status").is_none());
    }

    #[test]
    fn status_record_carries_numeric_code() {
        let record = EventRecord::new("status")
            .window(Some(0x1200))
            .status(StatusCode::SocketReady);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], 102);
        assert_eq!(json["window"], 0x1200);
    }

    #[test]
    fn metadata_descriptions() {
        assert_eq!(
            describe_metadata(&Metadata::Title("xterm".into())),
            "title=\"xterm\""
        );
        assert_eq!(
            describe_metadata(&Metadata::Transiency(0)),
            "transient_for=none"
        );
    }
}

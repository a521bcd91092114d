//! Wire vocabulary for the control protocol.
//!
//! Every application-level message is a JSON object carried as one encrypted
//! frame. Commands are tagged by `action`, with mouse and keyboard events
//! further tagged by `type`, mirroring the dispatch keys on the wire.
//! Decoding happens once at the protocol boundary; everything past it is an
//! exhaustive match on these types.

use serde::{Deserialize, Serialize};

/// Client → server instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Request one compressed frame of the server's screen.
    Screen,
    Mouse(MouseEvent),
    Keyboard(KeyboardEvent),
    /// Request a file from the server.
    FileDownload { path: String },
    /// Announce an upload of exactly `size` bytes, streamed as chunk frames
    /// immediately after this command.
    FileUpload { path: String, size: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MouseEvent {
    Move { x: i32, y: i32 },
    Click { x: i32, y: i32, button: MouseButton },
    DoubleClick { x: i32, y: i32, button: MouseButton },
    Drag { x: i32, y: i32, button: MouseButton },
    /// Positive `amount` scrolls up.
    Scroll { amount: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyboardEvent {
    /// Tap a single named key.
    Key { key: String },
    /// Press a chord in order, release in reverse.
    Hotkey { keys: Vec<String> },
    /// Type literal text.
    Write { text: String },
}

/// First frame on a new connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthResponse {
    Success,
    Failed { reason: String },
}

/// Server reply to a `screen` command. `image` is base64-encoded JPEG;
/// `width`/`height` are the captured dimensions, which the controlling side
/// uses to map its pointer coordinates back onto the remote screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenFrame {
    pub width: u32,
    pub height: u32,
    pub image: String,
}

/// First server frame answering `file_download`. An `error` reply is
/// terminal — no size, no chunks follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownloadHeader {
    Size { size: u64 },
    Error { error: String },
}

/// Terminal status frame for an upload, and the error shape for a failed
/// screen capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Error { message: String },
}

/// Result of decoding one post-authentication frame.
#[derive(Debug)]
pub enum DecodedCommand {
    Known(Command),
    /// Well-formed JSON whose `action` this build does not understand.
    /// Skipped rather than fatal, so a newer peer does not kill the session.
    Unknown(String),
}

/// Decode a command frame.
///
/// Bytes that are not JSON at all are an error (the channel is corrupt or
/// the peer is not speaking this protocol); valid JSON with an unknown
/// `action` decodes to [`DecodedCommand::Unknown`].
pub fn decode_command(bytes: &[u8]) -> Result<DecodedCommand, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    match serde_json::from_value::<Command>(value.clone()) {
        Ok(cmd) => Ok(DecodedCommand::Known(cmd)),
        Err(_) => {
            let action = value
                .get("action")
                .and_then(|a| a.as_str())
                .unwrap_or("<missing>")
                .to_string();
            Ok(DecodedCommand::Unknown(action))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(cmd: &Command) -> Command {
        let bytes = serde_json::to_vec(cmd).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn every_command_variant_roundtrips() {
        let commands = vec![
            Command::Screen,
            Command::Mouse(MouseEvent::Move { x: 10, y: -5 }),
            Command::Mouse(MouseEvent::Click {
                x: 100,
                y: 200,
                button: MouseButton::Left,
            }),
            Command::Mouse(MouseEvent::DoubleClick {
                x: 0,
                y: 0,
                button: MouseButton::Right,
            }),
            Command::Mouse(MouseEvent::Drag {
                x: 640,
                y: 480,
                button: MouseButton::Middle,
            }),
            Command::Mouse(MouseEvent::Scroll { amount: -3 }),
            Command::Keyboard(KeyboardEvent::Key { key: "enter".into() }),
            Command::Keyboard(KeyboardEvent::Hotkey {
                keys: vec!["ctrl".into(), "alt".into(), "delete".into()],
            }),
            Command::Keyboard(KeyboardEvent::Write {
                text: "hello world".into(),
            }),
            Command::FileDownload {
                path: "/tmp/report.pdf".into(),
            },
            Command::FileUpload {
                path: "/tmp/upload.bin".into(),
                size: 4097,
            },
        ];

        for cmd in commands {
            assert_eq!(roundtrip(&cmd), cmd);
        }
    }

    #[test]
    fn wire_shape_matches_protocol() {
        let click = Command::Mouse(MouseEvent::Click {
            x: 100,
            y: 200,
            button: MouseButton::Left,
        });
        assert_eq!(
            serde_json::to_value(&click).unwrap(),
            json!({"action": "mouse", "type": "click", "x": 100, "y": 200, "button": "left"})
        );

        assert_eq!(
            serde_json::to_value(Command::Screen).unwrap(),
            json!({"action": "screen"})
        );

        let upload = Command::FileUpload {
            path: "notes.txt".into(),
            size: 12,
        };
        assert_eq!(
            serde_json::to_value(&upload).unwrap(),
            json!({"action": "file_upload", "path": "notes.txt", "size": 12})
        );

        let hotkey = Command::Keyboard(KeyboardEvent::Hotkey {
            keys: vec!["ctrl".into(), "c".into()],
        });
        assert_eq!(
            serde_json::to_value(&hotkey).unwrap(),
            json!({"action": "keyboard", "type": "hotkey", "keys": ["ctrl", "c"]})
        );
    }

    #[test]
    fn auth_response_wire_shape() {
        assert_eq!(
            serde_json::to_value(AuthResponse::Success).unwrap(),
            json!({"status": "success"})
        );
        assert_eq!(
            serde_json::to_value(AuthResponse::Failed {
                reason: "Invalid password".into()
            })
            .unwrap(),
            json!({"status": "failed", "reason": "Invalid password"})
        );
    }

    #[test]
    fn download_header_distinguishes_size_from_error() {
        let size: DownloadHeader = serde_json::from_value(json!({"size": 1024})).unwrap();
        assert_eq!(size, DownloadHeader::Size { size: 1024 });

        let error: DownloadHeader =
            serde_json::from_value(json!({"error": "File not found"})).unwrap();
        assert_eq!(
            error,
            DownloadHeader::Error {
                error: "File not found".into()
            }
        );
    }

    #[test]
    fn unknown_action_is_tolerated() {
        let decoded = decode_command(br#"{"action": "reboot", "delay": 5}"#).unwrap();
        match decoded {
            DecodedCommand::Unknown(action) => assert_eq!(action, "reboot"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(decode_command(b"\x00\x01not json").is_err());
    }

    #[test]
    fn known_action_decodes() {
        let decoded = decode_command(br#"{"action": "screen"}"#).unwrap();
        assert!(matches!(decoded, DecodedCommand::Known(Command::Screen)));
    }
}

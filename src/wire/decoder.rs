//! # Frame Decoder
//!
//! Decodes server command frames and device reply frames, and finds frame
//! boundaries in a byte stream.

use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::protocol::*;
use crate::telemetry::frame::{ExternalFields, TelemetryFrame};

/// Number of ordered fields in a `@CFG` reply
pub const CONFIG_FIELD_COUNT: usize = 19;

fn frame_text(buffer: &[u8]) -> Result<&str, FrameError> {
    if !buffer.is_ascii() {
        return Err(FrameError::NotAscii);
    }
    // ASCII is always valid UTF-8
    std::str::from_utf8(buffer).map_err(|_| FrameError::NotAscii)
}

fn strip_line(text: &str) -> &str {
    text.strip_suffix("\r\n").unwrap_or(text)
}

/// Decode a server command frame.
///
/// Returns the command and the raw comma-separated tokens (command name
/// included). The keep-alive token is optional and only `"1"` means another
/// command follows.
///
/// # Errors
///
/// - [`FrameError::NotAscii`] if the frame contains non-ASCII bytes
/// - [`FrameError::MalformedFrame`] if the command name is not recognized.
///   The error still carries the frame's keep-alive flag.
pub fn decode_frame(buffer: &[u8]) -> Result<(Command, Vec<String>), FrameError> {
    let text = strip_line(frame_text(buffer)?);
    let tokens: Vec<String> = text.split(FIELD_SEPARATOR).map(str::to_string).collect();

    let name = tokens.first().map(String::as_str).unwrap_or_default();
    let keep_alive = tokens.get(1).map(|t| t == KEEP_ALIVE_ON).unwrap_or(false);

    let kind = match name {
        CMD_DRAIN_QUEUE => CommandKind::DrainQueue,
        CMD_READ_CONFIG => CommandKind::ReadConfig,
        CMD_WRITE_CONFIG => CommandKind::WriteConfig(tokens.iter().skip(2).cloned().collect()),
        CMD_FETCH_LOG => CommandKind::FetchLog,
        other => {
            return Err(FrameError::MalformedFrame {
                command: other.to_string(),
                keep_alive,
            })
        }
    };

    Ok((Command::new(kind, keep_alive), tokens))
}

/// Reassembles frames from stream reads.
///
/// Bytes are pushed as they arrive; complete frames are split off at the
/// first terminator of the requested mode. Anything after the terminator
/// stays buffered for the next frame.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: BytesMut,
    max_len: usize,
}

impl FrameAccumulator {
    /// Create an accumulator that rejects frames longer than `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Split off the next complete frame, terminator included.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// [`FrameError::FrameTooLarge`] if more than `max_len` bytes are
    /// buffered without a terminator.
    pub fn take_frame(&mut self, mode: FrameMode) -> Result<Option<Bytes>, FrameError> {
        let terminator = mode.terminator();
        let position = self
            .buf
            .windows(terminator.len())
            .position(|window| window == terminator);

        match position {
            Some(pos) => Ok(Some(self.buf.split_to(pos + terminator.len()).freeze())),
            None if self.buf.len() > self.max_len => Err(FrameError::FrameTooLarge {
                size: self.buf.len(),
                max: self.max_len,
            }),
            None => Ok(None),
        }
    }

    /// Split off exactly `count` bytes if that many are buffered.
    pub fn take_exact(&mut self, count: usize) -> Option<Bytes> {
        if self.buf.len() < count {
            return None;
        }
        Some(self.buf.split_to(count).freeze())
    }
}

fn expect_tag<'a>(text: &'a str, tag: &'static str) -> Result<Vec<&'a str>, FrameError> {
    let mut tokens: Vec<&str> = strip_line(text).split(FIELD_SEPARATOR).collect();
    let actual = tokens.first().copied().unwrap_or_default();
    if actual != tag {
        return Err(FrameError::UnexpectedTag {
            expected: tag,
            actual: actual.to_string(),
        });
    }
    tokens.remove(0);
    Ok(tokens)
}

fn parse<T: FromStr>(field: &'static str, token: &str) -> Result<T, FrameError> {
    token.parse().map_err(|_| FrameError::InvalidField {
        field,
        token: token.to_string(),
    })
}

fn parse_opt<T: FromStr>(field: &'static str, token: &str) -> Result<Option<T>, FrameError> {
    if token.is_empty() {
        Ok(None)
    } else {
        parse(field, token).map(Some)
    }
}

fn parse_flag(field: &'static str, token: &str) -> Result<bool, FrameError> {
    match token {
        "0" | "" => Ok(false),
        "1" => Ok(true),
        _ => Err(FrameError::InvalidField {
            field,
            token: token.to_string(),
        }),
    }
}

/// Decode a `+HRT` heartbeat frame.
pub fn decode_heartbeat(buffer: &[u8]) -> Result<HeartbeatFrame, FrameError> {
    let tokens = expect_tag(frame_text(buffer)?, TAG_HEARTBEAT)?;
    if tokens.len() != 3 {
        return Err(FrameError::FieldCount {
            expected: 3,
            actual: tokens.len(),
        });
    }

    Ok(HeartbeatFrame {
        pending_count: parse("pending_count", tokens[0])?,
        device_id: tokens[1].to_string(),
        protocol_version: parse("protocol_version", tokens[2])?,
    })
}

/// Decode a `@TEL` telemetry frame.
///
/// Empty numeric slots decode to `None`; an empty sensor type decodes to 0
/// (absent). The reserved slot must be empty.
pub fn decode_telemetry(buffer: &[u8]) -> Result<TelemetryFrame, FrameError> {
    let slots = expect_tag(frame_text(buffer)?, TAG_TELEMETRY)?;
    if slots.len() != TELEMETRY_SLOTS {
        return Err(FrameError::FieldCount {
            expected: TELEMETRY_SLOTS,
            actual: slots.len(),
        });
    }
    if !slots[TELEMETRY_RESERVED_SLOT].is_empty() {
        return Err(FrameError::InvalidField {
            field: "reserved",
            token: slots[TELEMETRY_RESERVED_SLOT].to_string(),
        });
    }

    let timestamp = if slots[0].is_empty() {
        None
    } else {
        let parsed = DateTime::parse_from_rfc3339(slots[0]).map_err(|_| FrameError::InvalidField {
            field: "timestamp",
            token: slots[0].to_string(),
        })?;
        Some(parsed.with_timezone(&Utc))
    };

    let external = ExternalFields {
        sensor_type: parse_opt("ex_type", slots[18])?.unwrap_or(0),
        uid: Some(slots[19].to_string()).filter(|uid| !uid.is_empty()),
        acceleration: [
            parse_opt("ex_ax", slots[20])?,
            parse_opt("ex_ay", slots[21])?,
            parse_opt("ex_az", slots[22])?,
        ],
        humidity: parse_opt("ex_hum", slots[23])?,
        temperature: parse_opt("ex_temp", slots[24])?,
        pressure: parse_opt("ex_press", slots[25])?,
        battery_mv: parse_opt("ex_batt", slots[26])?,
        tx_power_dbm: parse_opt("ex_tx", slots[27])?,
    };

    Ok(TelemetryFrame {
        timestamp,
        latitude: parse_opt("lat", slots[1])?,
        longitude: parse_opt("lng", slots[2])?,
        course: parse_opt("cog", slots[3])?,
        speed: parse_opt("speed", slots[4])?,
        battery_voltage: parse_opt("batt", slots[5])?,
        activity_alert: parse_flag("acc_alert", slots[6])?,
        acceleration: [
            parse_opt("ax", slots[7])?,
            parse_opt("ay", slots[8])?,
            parse_opt("az", slots[9])?,
            parse_opt("roll", slots[10])?,
            parse_opt("pitch", slots[11])?,
        ],
        temperature_alert: parse_flag("t_alert", slots[12])?,
        temperatures: [
            parse_opt("t1", slots[13])?,
            parse_opt("t2", slots[14])?,
            parse_opt("t3", slots[15])?,
            parse_opt("t4", slots[16])?,
        ],
        external,
    })
}

/// Decode a `@CFG` reply into its ordered field tokens.
pub fn decode_config(buffer: &[u8]) -> Result<Vec<String>, FrameError> {
    let tokens = expect_tag(frame_text(buffer)?, TAG_CONFIG)?;
    if tokens.len() != CONFIG_FIELD_COUNT {
        return Err(FrameError::FieldCount {
            expected: CONFIG_FIELD_COUNT,
            actual: tokens.len(),
        });
    }
    Ok(tokens.into_iter().map(str::to_string).collect())
}

/// Decode the `@log,{size}\r\n` header line, returning the announced size.
pub fn decode_log_header(buffer: &[u8]) -> Result<usize, FrameError> {
    let tokens = expect_tag(frame_text(buffer)?, TAG_LOG)?;
    if tokens.len() != 1 {
        return Err(FrameError::FieldCount {
            expected: 1,
            actual: tokens.len(),
        });
    }
    parse("size", tokens[0])
}

/// Unwrap an STX ... ETX log payload.
pub fn decode_log_body(body: &[u8]) -> Result<&[u8], FrameError> {
    match body {
        [STX, contents @ .., ETX] => Ok(contents),
        _ => Err(FrameError::InvalidField {
            field: "log_body",
            token: format!("{} bytes without STX/ETX framing", body.len()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::ruuvi::RawV2Reading;
    use crate::sensor::ExternalSensorReading;
    use crate::wire::encoder::{encode_heartbeat, encode_log, encode_telemetry};
    use chrono::TimeZone;

    #[test]
    fn test_decode_frame_commands() {
        let (cmd, tokens) = decode_frame(b"$TEL\r\n").unwrap();
        assert_eq!(cmd, Command::new(CommandKind::DrainQueue, false));
        assert_eq!(tokens, vec!["$TEL"]);

        let (cmd, _) = decode_frame(b"$RCF,1\r\n").unwrap();
        assert_eq!(cmd, Command::new(CommandKind::ReadConfig, true));

        let (cmd, _) = decode_frame(b"$LOG,0\r\n").unwrap();
        assert_eq!(cmd, Command::new(CommandKind::FetchLog, false));
    }

    #[test]
    fn test_decode_frame_keep_alive_only_one() {
        let (cmd, _) = decode_frame(b"$TEL,2\r\n").unwrap();
        assert!(!cmd.keep_alive);
        let (cmd, _) = decode_frame(b"$TEL,\r\n").unwrap();
        assert!(!cmd.keep_alive);
    }

    #[test]
    fn test_decode_write_config_tokens() {
        let (cmd, tokens) = decode_frame(b"$WCF,1,3,,60\r\n").unwrap();
        assert!(cmd.keep_alive);
        assert_eq!(
            cmd.kind,
            CommandKind::WriteConfig(vec!["3".to_string(), String::new(), "60".to_string()])
        );
        assert_eq!(tokens.len(), 5);
    }

    #[test]
    fn test_decode_frame_without_crlf() {
        let (cmd, _) = decode_frame(b"$RCF,0").unwrap();
        assert_eq!(cmd.kind, CommandKind::ReadConfig);
    }

    #[test]
    fn test_decode_frame_malformed_keeps_keep_alive() {
        let err = decode_frame(b"$XYZ,1\r\n").unwrap_err();
        assert_eq!(
            err,
            FrameError::MalformedFrame {
                command: "$XYZ".to_string(),
                keep_alive: true
            }
        );

        let err = decode_frame(b"\r\n").unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame { keep_alive: false, .. }));
    }

    #[test]
    fn test_decode_frame_not_ascii() {
        assert_eq!(decode_frame(b"$TEL\xff\r\n").unwrap_err(), FrameError::NotAscii);
    }

    #[test]
    fn test_accumulator_reassembles_split_reads() {
        let mut acc = FrameAccumulator::new(64);
        acc.push(b"$RC");
        assert_eq!(acc.take_frame(FrameMode::Line).unwrap(), None);
        acc.push(b"F,1\r");
        assert_eq!(acc.take_frame(FrameMode::Line).unwrap(), None);
        acc.push(b"\n$TEL\r\n");
        assert_eq!(
            acc.take_frame(FrameMode::Line).unwrap().unwrap().as_ref(),
            b"$RCF,1\r\n"
        );
        assert_eq!(
            acc.take_frame(FrameMode::Line).unwrap().unwrap().as_ref(),
            b"$TEL\r\n"
        );
        assert!(acc.is_empty());
    }

    #[test]
    fn test_accumulator_binary_drain_mode() {
        let mut acc = FrameAccumulator::new(1024);
        acc.push(b"@TEL,a\r\n@TEL,b\r\n\x04");
        let drained = acc.take_frame(FrameMode::BinaryDrain).unwrap().unwrap();
        assert_eq!(drained.as_ref(), b"@TEL,a\r\n@TEL,b\r\n\x04");
    }

    #[test]
    fn test_accumulator_rejects_oversized_frame() {
        let mut acc = FrameAccumulator::new(8);
        acc.push(b"$TEL,1,2,3,4");
        assert_eq!(
            acc.take_frame(FrameMode::Line).unwrap_err(),
            FrameError::FrameTooLarge { size: 12, max: 8 }
        );
    }

    #[test]
    fn test_accumulator_take_exact() {
        let mut acc = FrameAccumulator::new(64);
        acc.push(b"\x02abc");
        assert_eq!(acc.take_exact(6), None);
        acc.push(b"\x03rest");
        assert_eq!(acc.take_exact(5).unwrap().as_ref(), b"\x02abc\x03");
        assert_eq!(acc.len(), 4);
    }

    #[test]
    fn test_decode_heartbeat() {
        let hb = decode_heartbeat(&encode_heartbeat(7, "240AC4A1B2C3", 1)).unwrap();
        assert_eq!(hb.pending_count, 7);
        assert_eq!(hb.device_id, "240AC4A1B2C3");
        assert_eq!(hb.protocol_version, 1);

        assert!(matches!(
            decode_heartbeat(b"@TEL,1,2,3\r\n"),
            Err(FrameError::UnexpectedTag { .. })
        ));
        assert!(matches!(
            decode_heartbeat(b"+HRT,1\r\n"),
            Err(FrameError::FieldCount { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_telemetry_round_trip() {
        let reading = ExternalSensorReading::RawV2(RawV2Reading {
            humidity: 53.49,
            temperature: 24.3,
            pressure: 100_044,
            acceleration: [4, -4, 1036],
            battery_mv: 2977,
            tx_power_dbm: 4,
            movement_counter: 66,
            measurement_sequence: 205,
        });
        let frame = TelemetryFrame {
            timestamp: Some(Utc.with_ymd_and_hms(2023, 11, 2, 8, 15, 42).unwrap()),
            latitude: Some(-33.8688),
            longitude: Some(151.2093),
            course: None,
            speed: Some(0.0),
            battery_voltage: Some(3.92),
            activity_alert: false,
            acceleration: [Some(0.5), None, Some(-1.0), None, None],
            temperature_alert: true,
            temperatures: [Some(-18.5), Some(4.0), None, None],
            external: ExternalFields::from_reading(&reading, Some("C1D2E3F4A5B6")),
        };

        let decoded = decode_telemetry(&encode_telemetry(&frame)).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.external.sensor_type, 5);
    }

    #[test]
    fn test_decode_telemetry_absent_external() {
        let frame = TelemetryFrame::default();
        let decoded = decode_telemetry(&encode_telemetry(&frame)).unwrap();
        assert_eq!(decoded.external.sensor_type, 0);
        assert_eq!(decoded.external.uid, None);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_telemetry_rejects_filled_reserved_slot() {
        let text = String::from_utf8(encode_telemetry(&TelemetryFrame::default())).unwrap();
        // Slot 18 (reserved) sits between the fourth temperature and ex_type
        let mut tokens: Vec<String> = text.trim_end().split(',').map(str::to_string).collect();
        tokens[1 + TELEMETRY_RESERVED_SLOT] = "X".to_string();
        let tampered = format!("{}\r\n", tokens.join(","));
        assert!(matches!(
            decode_telemetry(tampered.as_bytes()),
            Err(FrameError::InvalidField { field: "reserved", .. })
        ));
    }

    #[test]
    fn test_decode_telemetry_wrong_slot_count() {
        assert!(matches!(
            decode_telemetry(b"@TEL,1,2\r\n"),
            Err(FrameError::FieldCount { expected: 28, actual: 2 })
        ));
    }

    #[test]
    fn test_decode_config_tokens() {
        let line = b"@CFG,2,1,30,host,8883,0,10,apn,10,15,0,FFFFFFFFFFFF,5,-10.0,50.0,0,0,200,300\r\n";
        let tokens = decode_config(line).unwrap();
        assert_eq!(tokens.len(), CONFIG_FIELD_COUNT);
        assert_eq!(tokens[3], "host");
        assert!(decode_config(b"@CFG,1,2\r\n").is_err());
    }

    #[test]
    fn test_decode_log() {
        let frame = encode_log(11, b"line1\nline2");
        let header_end = frame.windows(2).position(|w| w == b"\r\n").unwrap() + 2;
        assert_eq!(decode_log_header(&frame[..header_end]).unwrap(), 11);
        assert_eq!(decode_log_body(&frame[header_end..]).unwrap(), b"line1\nline2");
        assert!(decode_log_body(b"no framing").is_err());
    }
}

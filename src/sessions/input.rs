//! Keystroke scanning for the input side of a session.
//!
//! Clients send whatever their terminal widget produced — single keystrokes,
//! pasted bursts, control characters. [`scan`] walks the characters once,
//! maintains the per-session command buffer, and folds consecutive ordinary
//! bytes into single write batches so the child sees each burst contiguously.
//!
//! Only the classification lives here; what a submission *triggers* (newline
//! translation, git sampling) is the session manager's business.

/// One step of processed client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Bytes to forward to the child verbatim.
    Write(Vec<u8>),
    /// A carriage-return submission; `label` is the trimmed command line.
    Submit { label: String },
    /// A bare line feed: forwarded without sampling.
    LineFeed,
}

/// Scan `data`, updating `command_buffer`, and return the ordered events.
///
/// - Backspace (U+0008) / delete (U+007F) pop one code point off the buffer
///   and are still forwarded to the child.
/// - Ctrl-C (U+0003) clears the buffer and forces a flush so the interrupt
///   byte reaches the child without waiting for more input.
/// - `\r` flushes, emits [`InputEvent::Submit`] with the trimmed buffer as
///   label, and clears the buffer.
/// - `\n` flushes and emits [`InputEvent::LineFeed`]; the buffer is kept.
/// - Everything else accumulates in both the buffer and the pending batch.
pub fn scan(data: &str, command_buffer: &mut String) -> Vec<InputEvent> {
    let mut events = Vec::new();
    let mut pending: Vec<u8> = Vec::new();

    fn flush(pending: &mut Vec<u8>, events: &mut Vec<InputEvent>) {
        if !pending.is_empty() {
            events.push(InputEvent::Write(std::mem::take(pending)));
        }
    }

    let mut utf8 = [0u8; 4];
    for ch in data.chars() {
        match ch {
            '\u{0008}' | '\u{007f}' => {
                command_buffer.pop();
                pending.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
            '\u{0003}' => {
                command_buffer.clear();
                pending.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                flush(&mut pending, &mut events);
            }
            '\r' => {
                flush(&mut pending, &mut events);
                events.push(InputEvent::Submit {
                    label: command_buffer.trim().to_string(),
                });
                command_buffer.clear();
            }
            '\n' => {
                flush(&mut pending, &mut events);
                events.push(InputEvent::LineFeed);
            }
            _ => {
                command_buffer.push(ch);
                pending.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
    flush(&mut pending, &mut events);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(bytes: &[u8]) -> InputEvent {
        InputEvent::Write(bytes.to_vec())
    }

    #[test]
    fn plain_text_becomes_one_batch() {
        let mut buffer = String::new();
        let events = scan("ls -la", &mut buffer);
        assert_eq!(events, [write(b"ls -la")]);
        assert_eq!(buffer, "ls -la");
    }

    #[test]
    fn carriage_return_submits_and_clears() {
        let mut buffer = String::new();
        let events = scan("  echo hi \r", &mut buffer);
        assert_eq!(
            events,
            [
                write(b"  echo hi "),
                InputEvent::Submit {
                    label: "echo hi".to_string()
                },
            ]
        );
        assert_eq!(buffer, "");
    }

    #[test]
    fn line_feed_keeps_the_buffer() {
        let mut buffer = String::new();
        let events = scan("abc\n", &mut buffer);
        assert_eq!(events, [write(b"abc"), InputEvent::LineFeed]);
        assert_eq!(buffer, "abc");
    }

    #[test]
    fn backspace_pops_a_code_point_and_is_forwarded() {
        let mut buffer = String::new();
        let events = scan("ab\u{0008}c", &mut buffer);
        assert_eq!(events, [write(b"ab\x08c")]);
        assert_eq!(buffer, "ac");
    }

    #[test]
    fn delete_behaves_like_backspace() {
        let mut buffer = "日本".to_string();
        let events = scan("\u{007f}", &mut buffer);
        assert_eq!(events, [write(b"\x7f")]);
        assert_eq!(buffer, "日");
    }

    #[test]
    fn ctrl_c_clears_and_flushes_immediately() {
        let mut buffer = String::new();
        let events = scan("sleep 99\u{0003}x", &mut buffer);
        assert_eq!(events, [write(b"sleep 99\x03"), write(b"x")]);
        assert_eq!(buffer, "x");
    }

    #[test]
    fn crlf_pair_is_one_submission_plus_a_line_feed() {
        let mut buffer = String::new();
        let events = scan("pwd\r\n", &mut buffer);
        assert_eq!(
            events,
            [
                write(b"pwd"),
                InputEvent::Submit {
                    label: "pwd".to_string()
                },
                InputEvent::LineFeed,
            ]
        );
        assert_eq!(buffer, "");
    }

    #[test]
    fn multibyte_input_round_trips_as_utf8() {
        let mut buffer = String::new();
        let events = scan("héllo", &mut buffer);
        assert_eq!(events, [write("héllo".as_bytes())]);
        assert_eq!(buffer, "héllo");
    }

    #[test]
    fn empty_input_produces_nothing() {
        let mut buffer = "left".to_string();
        assert!(scan("", &mut buffer).is_empty());
        assert_eq!(buffer, "left");
    }
}

use bitcoin::{key::rand::Rng, secp256k1};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Frames on the writer socket are single line JSON documents terminated by `\n`
pub const FRAME_DELIMITER: u8 = b'\n';

pub type TaskId = String;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Reader -> writer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub task: Task,
    /// Higher runs first, advisory only
    #[serde(default)]
    pub priority: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub message: String,
}

/// Writer -> reader
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskResponse {
    pub id: TaskId,
    pub error: Option<TaskError>,
    #[serde(default)]
    pub result: Value,
}

impl TaskResponse {
    pub fn ok(id: TaskId, result: Value) -> Self {
        Self {
            id,
            error: None,
            result,
        }
    }

    pub fn err(id: TaskId, message: impl ToString) -> Self {
        Self {
            id,
            error: Some(TaskError {
                message: message.to_string(),
            }),
            result: Value::Null,
        }
    }
}

/// Random 4 byte id, hex encoded
pub fn new_task_id() -> TaskId {
    let bytes: [u8; 4] = secp256k1::rand::thread_rng().r#gen();

    hex::encode(bytes)
}

/// Serialize a message as one frame
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, Error> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(FRAME_DELIMITER);

    Ok(frame)
}

/// Largest frame accepted from a peer, delimiter excluded
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Accumulates bytes from a stream and yields complete frames. Bytes after the last delimiter
/// stay buffered until the rest of their frame arrives.
pub struct FrameBuffer {
    buffer: Vec<u8>,
    // bytes already searched for a delimiter
    scanned: usize,
    max_frame: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete frame, without its delimiter. Blank lines are skipped. A frame longer
    /// than the limit is an error, the stream cannot be resynchronised after it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            let found = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER);

            let Some(offset) = found else {
                self.scanned = self.buffer.len();

                if self.buffer.len() > self.max_frame {
                    return Err(Error::FrameTooLarge(self.max_frame));
                }

                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;

            if end > self.max_frame {
                return Err(Error::FrameTooLarge(self.max_frame));
            }

            let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
            frame.pop();

            if !frame.iter().all(u8::is_ascii_whitespace) {
                return Ok(Some(frame));
            }
        }
    }

    /// Bytes of an incomplete trailing frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_frames_wait_for_completion() {
        let request = TaskRequest {
            task: Task {
                id: "0badf00d".into(),
                method: "createWallet".into(),
                params: vec![json!("aa")],
            },
            priority: 5,
        };

        let frame = encode_frame(&request).unwrap();
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut buffer = FrameBuffer::new();

        buffer.extend(head);
        assert_eq!(buffer.next_frame().unwrap(), None);
        assert_eq!(buffer.pending(), head.len());

        buffer.extend(tail);
        let complete = buffer.next_frame().unwrap().unwrap();

        assert_eq!(serde_json::from_slice::<TaskRequest>(&complete).unwrap(), request);
        assert_eq!(buffer.next_frame().unwrap(), None);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn several_frames_in_one_read() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"{\"a\":1}\n\n{\"b\":2}\n{\"c\"");

        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"{\"a\":1}");
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"{\"b\":2}");
        assert_eq!(buffer.next_frame().unwrap(), None);
        assert_eq!(buffer.pending(), 4);
    }

    #[test]
    fn frame_split_over_many_reads() {
        let mut buffer = FrameBuffer::new();

        let chunks: [&[u8]; 4] = [b"{\"a\"", b":", b"12", b"3}"];

        for chunk in chunks {
            buffer.extend(chunk);
            assert_eq!(buffer.next_frame().unwrap(), None);
        }

        buffer.extend(b"\n{\"b\":1}\n");

        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"{\"a\":123}");
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"{\"b\":1}");
        assert_eq!(buffer.next_frame().unwrap(), None);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut buffer = FrameBuffer::with_max_frame(8);

        // exactly at the limit
        buffer.extend(b"12345678\n");
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"12345678");

        // no delimiter yet but already too long
        buffer.extend(b"123456789");
        assert!(matches!(buffer.next_frame(), Err(Error::FrameTooLarge(8))));

        // complete but too long
        let mut buffer = FrameBuffer::with_max_frame(8);
        buffer.extend(b"0123456789\n");
        assert!(matches!(buffer.next_frame(), Err(Error::FrameTooLarge(8))));
    }

    #[test]
    fn wire_shapes() {
        let request: TaskRequest = serde_json::from_value(json!({
            "task": { "id": "01020304", "method": "importAddresses", "params": ["w", ["a"]] },
            "priority": 10
        }))
        .unwrap();

        assert_eq!(request.task.params.len(), 2);
        assert_eq!(request.priority, 10);

        let ok = serde_json::to_value(TaskResponse::ok("01020304".into(), json!(true))).unwrap();
        assert_eq!(ok, json!({ "id": "01020304", "error": null, "result": true }));

        let err = serde_json::to_value(TaskResponse::err("x".into(), "boom")).unwrap();
        assert_eq!(err["error"]["message"], "boom");
    }

    #[test]
    fn task_ids_are_eight_hex_chars() {
        let id = new_task_id();

        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

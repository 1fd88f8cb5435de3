//! Best-effort decoding of a growing JSON arguments buffer.
//!
//! Tool-call arguments stream in as arbitrary fragments of one JSON object.
//! After each fragment the buffer is scanned once, remembering every
//! position at which cutting the text and closing the open containers yields
//! valid JSON. An unterminated string value is closed in place; a dangling
//! key, colon, comma or half-written literal is dropped back to the last such
//! checkpoint. A failed attempt is discarded and retried on the next fragment.

use serde_json::Value;

/// Accumulates fragments and reports each new decodable snapshot.
#[derive(Debug, Default)]
pub struct PartialDecoder {
  buffer: String,
  last: Option<Value>,
}

impl PartialDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends `fragment`. Returns the decoded object when it differs from the
  /// previous snapshot.
  pub fn push(&mut self, fragment: &str) -> Option<Value> {
    self.buffer.push_str(fragment);
    let decoded = decode_partial(&self.buffer)?;
    if self.last.as_ref() == Some(&decoded) {
      return None;
    }
    self.last = Some(decoded.clone());
    Some(decoded)
  }

  pub fn buffer(&self) -> &str {
    &self.buffer
  }

  pub fn last(&self) -> Option<&Value> {
    self.last.as_ref()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
  Object { expect_key: bool },
  Array,
}

struct Checkpoint {
  end: usize,
  closers: String,
}

fn closers(stack: &[Frame]) -> String {
  stack
    .iter()
    .rev()
    .map(|frame| match frame {
      Frame::Object { .. } => '}',
      Frame::Array => ']',
    })
    .collect()
}

/// Decodes the longest prefix of `input` that can be completed into a JSON
/// object. Returns `None` when not even `{}` is recoverable.
pub fn decode_partial(input: &str) -> Option<Value> {
  if let Ok(value) = serde_json::from_str::<Value>(input) {
    return value.is_object().then_some(value);
  }

  let mut stack: Vec<Frame> = Vec::new();
  let mut checkpoints: Vec<Checkpoint> = Vec::new();
  let mut in_string = false;
  let mut string_is_key = false;
  // Byte offset of an unfinished escape and how many characters it still needs.
  let mut escape: Option<(usize, u8)> = None;

  for (idx, ch) in input.char_indices() {
    if in_string {
      if let Some((start, remaining)) = escape {
        let remaining = match (remaining, ch) {
          (1, 'u') => 4,
          (1, _) => 0,
          (n, _) => n - 1,
        };
        escape = (remaining > 0).then_some((start, remaining));
        continue;
      }
      match ch {
        '\\' => escape = Some((idx, 1)),
        '"' => {
          in_string = false;
          if !string_is_key {
            checkpoints.push(Checkpoint {
              end: idx + 1,
              closers: closers(&stack),
            });
          }
        }
        _ => {}
      }
      continue;
    }

    match ch {
      '"' => {
        in_string = true;
        string_is_key = matches!(stack.last(), Some(Frame::Object { expect_key: true }));
      }
      '{' | '[' => {
        stack.push(if ch == '{' {
          Frame::Object { expect_key: true }
        } else {
          Frame::Array
        });
        checkpoints.push(Checkpoint {
          end: idx + 1,
          closers: closers(&stack),
        });
      }
      '}' | ']' => {
        stack.pop();
        if stack.is_empty() {
          break;
        }
        checkpoints.push(Checkpoint {
          end: idx + 1,
          closers: closers(&stack),
        });
      }
      ':' => {
        if let Some(Frame::Object { expect_key }) = stack.last_mut() {
          *expect_key = false;
        }
      }
      ',' => {
        checkpoints.push(Checkpoint {
          end: idx,
          closers: closers(&stack),
        });
        if let Some(Frame::Object { expect_key }) = stack.last_mut() {
          *expect_key = true;
        }
      }
      _ => {}
    }
  }

  // An open string value is worth keeping: close it where it stands.
  if in_string && !string_is_key && !stack.is_empty() {
    let cut = escape.map_or(input.len(), |(start, _)| start);
    let candidate = format!("{}\"{}", &input[..cut], closers(&stack));
    if let Some(value) = parse_object(&candidate) {
      return Some(value);
    }
  }

  checkpoints.iter().rev().find_map(|checkpoint| {
    parse_object(&format!("{}{}", &input[..checkpoint.end], checkpoint.closers))
  })
}

fn parse_object(candidate: &str) -> Option<Value> {
  serde_json::from_str::<Value>(candidate)
    .ok()
    .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  #[test]
  fn empty_and_non_object_buffers_decode_to_nothing() {
    assert_eq!(decode_partial(""), None);
    assert_eq!(decode_partial("   "), None);
    assert_eq!(decode_partial("[1,2]"), None);
    assert_eq!(decode_partial("\"str"), None);
  }

  #[test]
  fn open_brace_is_an_empty_object() {
    assert_eq!(decode_partial("{"), Some(json!({})));
    assert_eq!(decode_partial("{ "), Some(json!({})));
  }

  #[test]
  fn split_inside_a_key_drops_the_key() {
    assert_eq!(decode_partial("{\"pa"), Some(json!({})));
    assert_eq!(decode_partial("{\"path\""), Some(json!({})));
    assert_eq!(decode_partial("{\"path\":"), Some(json!({})));
    assert_eq!(decode_partial("{\"a\":1,\"pa"), Some(json!({ "a": 1 })));
  }

  #[test]
  fn split_inside_a_string_value_closes_it() {
    assert_eq!(decode_partial("{\"path\":\"sr"), Some(json!({ "path": "sr" })));
    assert_eq!(decode_partial("{\"path\":\""), Some(json!({ "path": "" })));
  }

  #[test]
  fn split_inside_an_escape_drops_the_escape() {
    assert_eq!(decode_partial("{\"s\":\"a\\"), Some(json!({ "s": "a" })));
    assert_eq!(decode_partial("{\"s\":\"a\\u00"), Some(json!({ "s": "a" })));
    assert_eq!(
      decode_partial("{\"s\":\"a\\u00e9b"),
      Some(json!({ "s": "aéb" }))
    );
    assert_eq!(decode_partial("{\"s\":\"a\\\"b"), Some(json!({ "s": "a\"b" })));
  }

  #[test]
  fn partial_literals_and_numbers_are_dropped() {
    assert_eq!(decode_partial("{\"n\":12"), Some(json!({})));
    assert_eq!(decode_partial("{\"n\":12,"), Some(json!({ "n": 12 })));
    assert_eq!(decode_partial("{\"ok\":tr"), Some(json!({})));
    assert_eq!(
      decode_partial("{\"a\":\"x\",\"ok\":fals"),
      Some(json!({ "a": "x" }))
    );
  }

  #[test]
  fn nested_containers_are_closed_in_order() {
    assert_eq!(
      decode_partial("{\"edits\":[{\"oldString\":\"a\",\"newString\":\"b"),
      Some(json!({ "edits": [{ "oldString": "a", "newString": "b" }] }))
    );
    assert_eq!(
      decode_partial("{\"edits\":[{\"oldString\":\"a\"},"),
      Some(json!({ "edits": [{ "oldString": "a" }] }))
    );
    assert_eq!(decode_partial("{\"tags\":[1,2"), Some(json!({ "tags": [1] })));
  }

  #[test]
  fn multibyte_text_is_preserved() {
    assert_eq!(
      decode_partial("{\"note\":\"café ☕"),
      Some(json!({ "note": "café ☕" }))
    );
  }

  #[test]
  fn complete_object_decodes_exactly() {
    assert_eq!(
      decode_partial("{\"path\":\".\",\"depth\":2}"),
      Some(json!({ "path": ".", "depth": 2 }))
    );
  }

  #[test]
  fn decoder_reports_only_changes() {
    let mut decoder = PartialDecoder::new();
    assert_eq!(decoder.push("{"), Some(json!({})));
    assert_eq!(decoder.push("\"pa"), None);
    assert_eq!(decoder.push("th\":\"a"), Some(json!({ "path": "a" })));
    assert_eq!(decoder.push("\""), None);
    assert_eq!(decoder.push("}"), None);
    assert_eq!(decoder.buffer(), "{\"path\":\"a\"}");
    assert_eq!(decoder.last(), Some(&json!({ "path": "a" })));
  }
}

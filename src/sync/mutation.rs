//! The closed set of writes that can be queued for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A replayable write. Stored as `(type, data)`; the tag strings are the
/// durable format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MutationOp {
  #[serde(rename = "book:create")]
  BookCreate(Value),

  #[serde(rename = "book:update")]
  BookUpdate { id: i64, updates: Value },

  #[serde(rename = "book:delete")]
  BookDelete { id: i64 },

  #[serde(rename = "path:create")]
  PathCreate(Value),

  #[serde(rename = "path:update")]
  PathUpdate { id: i64, updates: Value },

  #[serde(rename = "path:delete")]
  PathDelete { id: i64 },

  #[serde(rename = "path:addBook")]
  PathAddBook {
    #[serde(rename = "pathId")]
    path_id: i64,
    #[serde(rename = "userBookId")]
    user_book_id: i64,
  },

  #[serde(rename = "path:removeBook")]
  PathRemoveBook {
    #[serde(rename = "pathId")]
    path_id: i64,
    #[serde(rename = "userBookId")]
    user_book_id: i64,
  },
}

impl MutationOp {
  /// Stored type tag.
  pub fn kind(&self) -> &'static str {
    match self {
      MutationOp::BookCreate(_) => "book:create",
      MutationOp::BookUpdate { .. } => "book:update",
      MutationOp::BookDelete { .. } => "book:delete",
      MutationOp::PathCreate(_) => "path:create",
      MutationOp::PathUpdate { .. } => "path:update",
      MutationOp::PathDelete { .. } => "path:delete",
      MutationOp::PathAddBook { .. } => "path:addBook",
      MutationOp::PathRemoveBook { .. } => "path:removeBook",
    }
  }

  /// Stored payload, everything needed to replay the write.
  pub fn payload(&self) -> Value {
    match self {
      MutationOp::BookCreate(data) | MutationOp::PathCreate(data) => data.clone(),
      MutationOp::BookUpdate { id, updates } | MutationOp::PathUpdate { id, updates } => {
        json!({ "id": id, "updates": updates })
      }
      MutationOp::BookDelete { id } | MutationOp::PathDelete { id } => json!({ "id": id }),
      MutationOp::PathAddBook {
        path_id,
        user_book_id,
      }
      | MutationOp::PathRemoveBook {
        path_id,
        user_book_id,
      } => json!({ "pathId": path_id, "userBookId": user_book_id }),
    }
  }

  /// Rebuild an op from its stored parts.
  pub fn from_parts(kind: &str, payload: Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(json!({ "type": kind, "data": payload }))
  }
}

/// A queued write as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  /// Store-assigned, increasing
  pub id: i64,
  pub kind: String,
  /// `None` when the stored data could not be decoded
  pub payload: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replays so far
  pub attempt: u32,
}

impl Mutation {
  pub fn op(&self) -> Result<MutationOp, serde_json::Error> {
    match self.payload {
      Some(ref payload) => MutationOp::from_parts(&self.kind, payload.clone()),
      None => Err(serde::de::Error::custom("stored payload is not valid JSON")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stored_parts_rebuild_the_op() {
    let ops = vec![
      MutationOp::BookCreate(json!({"title": "Dune"})),
      MutationOp::BookUpdate {
        id: 7,
        updates: json!({"status": "reading"}),
      },
      MutationOp::BookDelete { id: 7 },
      MutationOp::PathCreate(json!({"name": "Systems"})),
      MutationOp::PathUpdate {
        id: 2,
        updates: json!({"name": "Distributed"}),
      },
      MutationOp::PathDelete { id: 2 },
      MutationOp::PathAddBook {
        path_id: 2,
        user_book_id: 9,
      },
      MutationOp::PathRemoveBook {
        path_id: 2,
        user_book_id: 9,
      },
    ];

    for op in ops {
      let rebuilt = MutationOp::from_parts(op.kind(), op.payload()).unwrap();
      assert_eq!(rebuilt, op);
    }
  }

  #[test]
  fn test_membership_payload_uses_camel_case() {
    let op = MutationOp::PathAddBook {
      path_id: 2,
      user_book_id: 9,
    };
    assert_eq!(op.payload(), json!({"pathId": 2, "userBookId": 9}));
    assert_eq!(
      serde_json::to_value(&op).unwrap(),
      json!({"type": "path:addBook", "data": {"pathId": 2, "userBookId": 9}})
    );
  }

  #[test]
  fn test_unknown_type_is_rejected() {
    assert!(MutationOp::from_parts("book:archive", json!({"id": 1})).is_err());
  }
}

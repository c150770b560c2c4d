use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stored in `error_message` when a failure arrives without a usable summary.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Processing failed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only ways a document may change state.
///
/// ```text
/// PENDING --Claim--> PROCESSING --Complete--> COMPLETED
///                               \--Fail-----> FAILED
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Complete { output_filename: String },
    Fail { error_message: String },
}

impl Transition {
    pub fn from_status(&self) -> DocumentStatus {
        match self {
            Transition::Claim => DocumentStatus::Pending,
            Transition::Complete { .. } | Transition::Fail { .. } => DocumentStatus::Processing,
        }
    }

    pub fn to_status(&self) -> DocumentStatus {
        match self {
            Transition::Claim => DocumentStatus::Processing,
            Transition::Complete { .. } => DocumentStatus::Completed,
            Transition::Fail { .. } => DocumentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move document from {from} to {to}")]
pub struct InvalidTransition {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

/// Upload metadata captured by the gateway before the record exists.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub mime_type: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub output_filename: Option<String>,
    pub mime_type: String,
    pub file_size: u64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(new: NewDocument, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            original_filename: new.original_filename,
            stored_filename: new.stored_filename,
            output_filename: None,
            mime_type: new.mime_type,
            file_size: new.file_size,
            status: DocumentStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `transition` if it is legal from the current status.
    ///
    /// On error the document is left untouched.
    pub fn apply(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status != transition.from_status() {
            return Err(InvalidTransition {
                from: self.status,
                to: transition.to_status(),
            });
        }

        let next = transition.to_status();
        match transition {
            Transition::Claim => {
                self.output_filename = None;
                self.error_message = None;
            }
            Transition::Complete { output_filename } => {
                self.output_filename = Some(output_filename);
                self.error_message = None;
            }
            Transition::Fail { error_message } => {
                let message = error_message.trim();
                self.error_message = Some(if message.is_empty() {
                    DEFAULT_FAILURE_MESSAGE.to_string()
                } else {
                    message.to_string()
                });
                self.output_filename = None;
            }
        }

        self.status = next;
        self.updated_at = now.max(self.updated_at);
        Ok(())
    }

    /// `output_filename` is set iff COMPLETED and `error_message` iff FAILED.
    pub fn is_consistent(&self) -> bool {
        let output_ok = self.output_filename.is_some() == (self.status == DocumentStatus::Completed);
        let error_ok = self.error_message.is_some() == (self.status == DocumentStatus::Failed);
        output_ok && error_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn new_document() -> Document {
        Document::new(
            NewDocument {
                id: "doc-1".to_string(),
                original_filename: "report.docx".to_string(),
                stored_filename: "uploads/doc-1.docx".to_string(),
                mime_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                    .to_string(),
                file_size: 42,
            },
            Utc::now(),
        )
    }

    fn random_transition(rng: &mut impl Rng) -> Transition {
        let choices = [
            Transition::Claim,
            Transition::Complete {
                output_filename: "outputs/doc-1.xlsx".to_string(),
            },
            Transition::Fail {
                error_message: "broken".to_string(),
            },
            Transition::Fail {
                error_message: "   ".to_string(),
            },
        ];
        choices.choose(rng).cloned().unwrap()
    }

    #[test]
    fn new_document_is_pending_and_consistent() {
        let doc = new_document();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.created_at, doc.updated_at);
        assert!(doc.is_consistent());
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut doc = new_document();
        let claimed_at = doc.updated_at + Duration::seconds(1);
        doc.apply(Transition::Claim, claimed_at).unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert_eq!(doc.updated_at, claimed_at);

        doc.apply(
            Transition::Complete {
                output_filename: "outputs/doc-1.xlsx".to_string(),
            },
            claimed_at + Duration::seconds(1),
        )
        .unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.output_filename.as_deref(), Some("outputs/doc-1.xlsx"));
        assert!(doc.is_consistent());
    }

    #[test]
    fn cannot_skip_processing() {
        let mut doc = new_document();
        let before = doc.clone();
        let err = doc
            .apply(
                Transition::Complete {
                    output_filename: "outputs/doc-1.xlsx".to_string(),
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.from, DocumentStatus::Pending);
        assert_eq!(err.to, DocumentStatus::Completed);
        assert_eq!(doc, before);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut doc = new_document();
        doc.apply(Transition::Claim, Utc::now()).unwrap();
        doc.apply(
            Transition::Fail {
                error_message: "bad input".to_string(),
            },
            Utc::now(),
        )
        .unwrap();

        let frozen = doc.clone();
        for transition in [
            Transition::Claim,
            Transition::Complete {
                output_filename: "x".to_string(),
            },
            Transition::Fail {
                error_message: "again".to_string(),
            },
        ] {
            assert!(doc.apply(transition, Utc::now()).is_err());
            assert_eq!(doc, frozen);
        }
    }

    #[test]
    fn blank_failure_message_is_replaced() {
        let mut doc = new_document();
        doc.apply(Transition::Claim, Utc::now()).unwrap();
        doc.apply(
            Transition::Fail {
                error_message: "  ".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(doc.error_message.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let mut doc = new_document();
        let earlier = doc.updated_at - Duration::seconds(30);
        doc.apply(Transition::Claim, earlier).unwrap();
        assert!(doc.updated_at >= doc.created_at);
    }

    #[test]
    fn random_transition_sequences_preserve_invariants() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

        for _ in 0..500 {
            let mut doc = new_document();
            let mut previous = doc.status;
            for _ in 0..rng.gen_range(1..12) {
                let transition = random_transition(&mut rng);
                let snapshot = doc.clone();
                match doc.apply(transition.clone(), Utc::now()) {
                    Ok(()) => {
                        assert_eq!(previous, transition.from_status());
                        assert_eq!(doc.status, transition.to_status());
                        assert!(!previous.is_terminal());
                    }
                    Err(_) => assert_eq!(doc, snapshot),
                }
                assert!(doc.is_consistent(), "inconsistent document: {:?}", doc);
                if doc.status == DocumentStatus::Failed {
                    assert!(!doc.error_message.as_deref().unwrap_or("").is_empty());
                }
                previous = doc.status;
            }
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Completed).unwrap(),
            "\"completed\""
        );
        let parsed: DocumentStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(parsed, DocumentStatus::Processing);
    }
}

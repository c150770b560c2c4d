pub mod document;

pub use document::{
    Document, DocumentStatus, InvalidTransition, NewDocument, Transition,
    DEFAULT_FAILURE_MESSAGE,
};

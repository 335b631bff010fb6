//! Form glue for nonce-authorized uploads.
//!
//! - Declarative form definitions with typed elements
//! - Nonced fields that provision and validate upload nonces
//! - Retained upload fields that carry uploads and saved files across
//!   multi-step submissions

mod nonced;
mod retained;
mod types;

pub use nonced::{
    FieldValidator, NONCE_SUFFIX, NoncedBinding, NoncedForm, NoncedValidation, REF_SUFFIX,
};
pub use retained::{
    AUTO_PREFIX, Extras, MaterializedUpload, MissReason, NONCE_FIELD, REFERENCE_MAX_LENGTH,
    ReconciliationMiss, RetainedUploads, RetainedUploadsConfig, SAVED_PREFIX, SaveableObject,
    UPLOAD_PREFIX,
};
pub use types::{ElementType, Form, FormElement, FormValues, ValidationError};

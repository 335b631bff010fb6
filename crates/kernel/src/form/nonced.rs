//! Nonce-bound form fields.
//!
//! A nonced field `image` is backed by two hidden elements: `image_nonce`
//! carries a signed upload nonce provisioned when the form is built, and
//! `image_ref` carries the id of an upload made with it. Validation runs an
//! ordered pipeline per field and stops at the first failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Nonce, Upload};
use crate::nonce::{NonceAuthority, NonceError};

use super::types::{Form, FormElement, FormValues, ValidationError};

/// Suffix of the element carrying the signed nonce.
pub const NONCE_SUFFIX: &str = "nonce";

/// Suffix of the element carrying the upload reference.
pub const REF_SUFFIX: &str = "ref";

/// A validator for a single submitted value. Returns the cleaned value or a
/// message for the end user.
pub type FieldValidator = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

enum Step {
    Custom {
        field: String,
        validator: FieldValidator,
    },
    ResolveNonce,
    LookupReference,
}

/// What a nonced field resolved to.
#[derive(Debug, Clone)]
pub struct NoncedBinding {
    pub nonce: Nonce,
    /// The referenced upload, if one was submitted and belongs to the nonce.
    pub upload: Option<Upload>,
}

/// Outcome of validating nonced fields.
#[derive(Debug, Default)]
pub struct NoncedValidation {
    /// Submitted values after the custom validators ran.
    pub cleaned: FormValues,
    /// Bindings for fields whose nonce resolved, keyed by field name.
    pub bindings: BTreeMap<String, NoncedBinding>,
    pub errors: Vec<ValidationError>,
}

impl NoncedValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn binding(&self, name: &str) -> Option<&NoncedBinding> {
        self.bindings.get(name)
    }
}

/// Declares nonced fields and the validators that run before the built-in
/// nonce and reference steps.
#[derive(Default)]
pub struct NoncedForm {
    fields: Vec<String>,
    key_prefix: String,
    validators: HashMap<String, Vec<FieldValidator>>,
}

impl NoncedForm {
    /// Declare the nonced fields by name.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Prefix for provisioned nonce keys.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Add a validator for an element, e.g. `image_nonce` or `image_ref`.
    ///
    /// Validators for the same element run in the order they were added,
    /// ahead of the built-in step for that element.
    pub fn validator<F>(mut self, element: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.validators
            .entry(element.into())
            .or_default()
            .push(Arc::new(f));
        self
    }

    /// Declared nonced field names.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Inject the hidden nonce and reference elements into `form`.
    ///
    /// Each nonced field gets a freshly generated token bound to `owner`.
    pub fn build(
        &self,
        mut form: Form,
        authority: &NonceAuthority,
        owner: Option<Uuid>,
    ) -> Result<Form, NonceError> {
        for name in &self.fields {
            let token = authority.generate(&self.key_prefix, owner)?;

            let nonce_name = element_name(name, NONCE_SUFFIX);
            match form.get_element_mut(&nonce_name) {
                Some(element) => element.default_value = Some(Value::String(token)),
                None => {
                    form.elements
                        .insert(nonce_name, FormElement::hidden().default_value(token));
                }
            }

            form.elements
                .entry(element_name(name, REF_SUFFIX))
                .or_insert_with(FormElement::hidden);
        }

        Ok(form)
    }

    fn pipeline(&self, name: &str) -> Vec<Step> {
        let custom = |element: String| -> Vec<Step> {
            self.validators
                .get(&element)
                .into_iter()
                .flatten()
                .map(|validator| Step::Custom {
                    field: element.clone(),
                    validator: Arc::clone(validator),
                })
                .collect()
        };

        let mut steps = custom(element_name(name, NONCE_SUFFIX));
        steps.push(Step::ResolveNonce);
        steps.extend(custom(element_name(name, REF_SUFFIX)));
        steps.push(Step::LookupReference);
        steps
    }

    /// Validate submitted values for every nonced field.
    pub async fn validate(&self, values: &FormValues, authority: &NonceAuthority) -> NoncedValidation {
        let mut outcome = NoncedValidation {
            cleaned: values.clone(),
            ..NoncedValidation::default()
        };

        for name in &self.fields {
            let nonce_name = element_name(name, NONCE_SUFFIX);
            let ref_name = element_name(name, REF_SUFFIX);
            let mut binding: Option<NoncedBinding> = None;

            for step in self.pipeline(name) {
                match step {
                    Step::Custom { field, validator } => {
                        let value = outcome.cleaned.get(&field).cloned().unwrap_or(Value::Null);
                        match validator(&value) {
                            Ok(cleaned) => {
                                outcome.cleaned.insert(field, cleaned);
                            }
                            Err(message) => {
                                outcome.errors.push(ValidationError::field(field, message));
                                break;
                            }
                        }
                    }
                    Step::ResolveNonce => {
                        let token = outcome.cleaned.get(&nonce_name).and_then(Value::as_str);
                        match authority.resolve(token).await {
                            Ok(nonce) => {
                                binding = Some(NoncedBinding {
                                    nonce,
                                    upload: None,
                                });
                            }
                            Err(e) => {
                                debug!(field = %name, error = %e, "nonce rejected");
                                outcome
                                    .errors
                                    .push(ValidationError::field(&nonce_name, e.to_string()));
                                break;
                            }
                        }
                    }
                    Step::LookupReference => {
                        let Some(binding) = binding.as_mut() else {
                            continue;
                        };
                        let (Some(nonce_id), Some(upload_id)) = (
                            binding.nonce.id,
                            outcome.cleaned.get(&ref_name).and_then(reference_id),
                        ) else {
                            continue;
                        };

                        match authority.store().find_upload(nonce_id, upload_id).await {
                            Ok(upload) => binding.upload = upload,
                            Err(e) => {
                                warn!(field = %name, upload_id, error = %e, "upload lookup failed");
                            }
                        }
                    }
                }
            }

            if let Some(binding) = binding {
                outcome.bindings.insert(name.clone(), binding);
            }
        }

        outcome
    }
}

impl std::fmt::Debug for NoncedForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoncedForm")
            .field("fields", &self.fields)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

fn element_name(field: &str, suffix: &str) -> String {
    format!("{field}_{suffix}")
}

/// Parse a submitted upload reference: a number or a numeric string.
fn reference_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_id() {
        assert_eq!(reference_id(&Value::from(5)), Some(5));
        assert_eq!(reference_id(&Value::from(" 9 ")), Some(9));
        assert_eq!(reference_id(&Value::from("")), None);
        assert_eq!(reference_id(&Value::Null), None);
    }

    #[test]
    fn test_pipeline_order() {
        let form = NoncedForm::new(["image"])
            .validator("image_ref", |v| Ok(v.clone()))
            .validator("image_nonce", |v| Ok(v.clone()));

        let steps = form.pipeline("image");
        assert_eq!(steps.len(), 4);
        assert!(matches!(&steps[0], Step::Custom { field, .. } if field == "image_nonce"));
        assert!(matches!(steps[1], Step::ResolveNonce));
        assert!(matches!(&steps[2], Step::Custom { field, .. } if field == "image_ref"));
        assert!(matches!(steps[3], Step::LookupReference));
    }
}

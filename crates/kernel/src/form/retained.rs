//! Retained upload fields.
//!
//! Multi-step forms reference files two ways: uploads made with the form's
//! nonce that haven't been saved yet, and files already attached to the
//! record being edited. [`RetainedUploads`] works out which of both are
//! still live for the current request and synthesizes the hidden fields
//! that carry them through the next round trip.
//!
//! Before the first submission every saveable object is live and there are
//! no uploads. Once the form has been submitted, only identifiers named in
//! the submitted data count, and each one must resolve against the
//! authoritative set (the nonce's uploads, or the saveable objects).
//! Identifiers that don't resolve are dropped and recorded as
//! [`ReconciliationMiss`]es; they never stop the form from rendering.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::file::UploadService;
use crate::models::{Nonce, Upload};

use super::types::{Form, FormElement, FormValues};

/// Prefix for generated extra sub-fields.
pub const AUTO_PREFIX: &str = "auto_";

/// Prefix for fields referencing unsaved uploads.
pub const UPLOAD_PREFIX: &str = "upload_";

/// Prefix for fields referencing already-saved files.
pub const SAVED_PREFIX: &str = "saved_";

/// Submitted field carrying the signed nonce token.
pub const NONCE_FIELD: &str = "nonce";

/// Maximum length of a synthesized reference field.
pub const REFERENCE_MAX_LENGTH: usize = 250;

/// A file already attached to the record the form edits.
pub trait SaveableObject {
    /// Stable identifier, used in field names.
    fn identifier(&self) -> String;

    /// URL the file is served from.
    fn url(&self) -> String;

    /// Initial value for an extra sub-field, e.g. a stored description.
    fn extra_initial(&self, _extra: &str) -> Option<Value> {
        None
    }
}

/// Naming and extra-field configuration for a retained upload form.
#[derive(Debug, Clone)]
pub struct RetainedUploadsConfig {
    pub auto_prefix: String,
    pub upload_prefix: String,
    pub saved_prefix: String,
    pub nonce_field: String,

    /// Extra sub-fields synthesized per file, keyed by extra name. The
    /// element is used as a template.
    pub extra_fields: BTreeMap<String, FormElement>,
}

impl Default for RetainedUploadsConfig {
    fn default() -> Self {
        Self {
            auto_prefix: AUTO_PREFIX.to_string(),
            upload_prefix: UPLOAD_PREFIX.to_string(),
            saved_prefix: SAVED_PREFIX.to_string(),
            nonce_field: NONCE_FIELD.to_string(),
            extra_fields: BTreeMap::new(),
        }
    }
}

impl RetainedUploadsConfig {
    /// Configuration with the default prefixes and no extras.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an extra sub-field.
    pub fn extra_field(mut self, name: impl Into<String>, template: FormElement) -> Self {
        self.extra_fields.insert(name.into(), template);
        self
    }

    /// Name of the extra sub-field `extra` for file `id` under `prefix`.
    ///
    /// The file prefix is part of the name, so an upload and a saved file
    /// with the same identifier never share extras.
    pub fn extra_field_name(&self, prefix: &str, id: &str, extra: &str) -> String {
        format!("{}{prefix}{id}_{extra}", self.auto_prefix)
    }

    fn is_extra_field_name(&self, name: &str) -> bool {
        [&self.upload_prefix, &self.saved_prefix].iter().any(|prefix| {
            let Some(rest) = name
                .strip_prefix(self.auto_prefix.as_str())
                .and_then(|rest| rest.strip_prefix(prefix.as_str()))
            else {
                return false;
            };
            self.extra_fields.keys().any(|extra| {
                rest.strip_suffix(extra.as_str())
                    .and_then(|id| id.strip_suffix('_'))
                    .is_some_and(|id| !id.is_empty())
            })
        })
    }

    /// Identifiers referenced by submitted field names under `prefix`.
    fn submitted_ids(&self, values: &FormValues, prefix: &str) -> BTreeSet<String> {
        values
            .keys()
            .filter(|name| !self.is_extra_field_name(name))
            .filter_map(|name| name.strip_prefix(prefix))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Why a submitted identifier was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissReason {
    #[error("no such upload for the submitted nonce")]
    UnknownUpload,

    #[error("no such saved file")]
    UnknownSavedFile,

    #[error("uploads unavailable: {0}")]
    NonceUnavailable(String),
}

/// A submitted identifier that didn't resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{prefix}{identifier}: {reason}")]
pub struct ReconciliationMiss {
    pub prefix: String,
    pub identifier: String,
    pub reason: MissReason,
}

/// Values of a file's extra sub-fields, keyed by extra name.
pub type Extras = BTreeMap<String, Option<Value>>;

/// An upload ready to be moved into permanent storage.
#[derive(Debug, Clone)]
pub struct MaterializedUpload {
    /// Reference field that carried the upload.
    pub field_name: String,
    /// Target filename: `{target_prefix}-{id}{ext}`.
    pub target_name: String,
    pub upload: Upload,
    pub extras: Extras,
}

/// Live uploads and saved files for one form instance.
#[derive(Debug)]
pub struct RetainedUploads<T> {
    config: RetainedUploadsConfig,
    submitted: Option<FormValues>,
    nonce: Option<Nonce>,
    uploads: Vec<Upload>,
    saved: Vec<T>,
    fields: BTreeMap<String, FormElement>,
    misses: Vec<ReconciliationMiss>,
}

impl<T: SaveableObject> RetainedUploads<T> {
    /// Reconcile submitted data (if any) against the nonce's uploads and
    /// the caller's saveable objects.
    pub async fn build(
        config: RetainedUploadsConfig,
        service: &UploadService,
        submitted: Option<&FormValues>,
        saveable: Vec<T>,
    ) -> Self {
        let mut retained = Self {
            config,
            submitted: submitted.cloned(),
            nonce: None,
            uploads: Vec::new(),
            saved: Vec::new(),
            fields: BTreeMap::new(),
            misses: Vec::new(),
        };

        match submitted {
            Some(values) => {
                retained.reconcile_uploads(service, values).await;
                retained.reconcile_saved(values, saveable);
            }
            None => retained.saved = saveable,
        }

        retained.synthesize_fields(service);

        debug!(
            uploads = retained.uploads.len(),
            saved = retained.saved.len(),
            misses = retained.misses.len(),
            "retained uploads reconciled"
        );

        retained
    }

    async fn reconcile_uploads(&mut self, service: &UploadService, values: &FormValues) {
        let prefix = self.config.upload_prefix.clone();
        let ids = self.config.submitted_ids(values, &prefix);
        if ids.is_empty() {
            return;
        }

        let token = values.get(&self.config.nonce_field).and_then(Value::as_str);

        let known = match self.nonce_uploads(service, token).await {
            Ok(known) => known,
            Err(message) => {
                for id in ids {
                    self.miss(&prefix, id, MissReason::NonceUnavailable(message.clone()));
                }
                return;
            }
        };

        let mut live = Vec::new();
        for id in ids {
            match id.parse::<i64>().ok().and_then(|pk| known.get(&pk)) {
                Some(upload) => live.push(upload.clone()),
                None => self.miss(&prefix, id, MissReason::UnknownUpload),
            }
        }
        live.sort_by_key(|upload| upload.id);
        self.uploads = live;
    }

    /// Uploads of the nonce named by the submitted token, keyed by id.
    async fn nonce_uploads(
        &mut self,
        service: &UploadService,
        token: Option<&str>,
    ) -> Result<HashMap<i64, Upload>, String> {
        let authority = service.authority();
        let nonce = authority.resolve(token).await.map_err(|e| e.to_string())?;

        let uploads = match nonce.id {
            Some(nonce_id) => authority
                .store()
                .uploads_for_nonce(nonce_id)
                .await
                .map_err(|e| e.to_string())?,
            // Nothing has been uploaded with a pending nonce yet.
            None => Vec::new(),
        };

        self.nonce = Some(nonce);
        Ok(uploads.into_iter().map(|u| (u.id, u)).collect())
    }

    fn reconcile_saved(&mut self, values: &FormValues, saveable: Vec<T>) {
        let prefix = self.config.saved_prefix.clone();
        let mut ids = self.config.submitted_ids(values, &prefix);

        for object in saveable {
            if ids.remove(&object.identifier()) {
                self.saved.push(object);
            }
        }

        for id in ids {
            self.miss(&prefix, id, MissReason::UnknownSavedFile);
        }
    }

    fn miss(&mut self, prefix: &str, identifier: String, reason: MissReason) {
        warn!(prefix, identifier = %identifier, reason = %reason, "referenced file not found");
        self.misses.push(ReconciliationMiss {
            prefix: prefix.to_string(),
            identifier,
            reason,
        });
    }

    fn synthesize_fields(&mut self, service: &UploadService) {
        let mut fields = BTreeMap::new();

        for upload in &self.uploads {
            let id = upload.id.to_string();
            let url = service.storage().public_url(&upload.uri);
            self.add_fields(&mut fields, &self.config.upload_prefix, &id, &url, |_| None);
        }

        for object in &self.saved {
            self.add_fields(
                &mut fields,
                &self.config.saved_prefix,
                &object.identifier(),
                &object.url(),
                |extra| object.extra_initial(extra),
            );
        }

        self.fields = fields;
    }

    fn add_fields(
        &self,
        fields: &mut BTreeMap<String, FormElement>,
        prefix: &str,
        id: &str,
        url: &str,
        initial: impl Fn(&str) -> Option<Value>,
    ) {
        fields.insert(
            format!("{prefix}{id}"),
            FormElement::hidden()
                .title(url)
                .default_value(id)
                .max_length(REFERENCE_MAX_LENGTH),
        );

        for (extra, template) in &self.config.extra_fields {
            let name = self.config.extra_field_name(prefix, id, extra);
            let mut element = template.clone();

            let value = match &self.submitted {
                Some(values) => values.get(&name).cloned(),
                None => initial(extra),
            };
            if value.is_some() {
                element.default_value = value;
            }

            fields.insert(name, element);
        }
    }

    /// Extra sub-field values for a file.
    ///
    /// After submission these are the submitted values; before that, the
    /// synthesized fields' initial values.
    fn extras(&self, prefix: &str, id: &str) -> Extras {
        self.config
            .extra_fields
            .keys()
            .map(|extra| {
                let name = self.config.extra_field_name(prefix, id, extra);
                let value = match &self.submitted {
                    Some(values) => values.get(&name).cloned(),
                    None => self.fields.get(&name).and_then(|f| f.default_value.clone()),
                };
                (extra.clone(), value)
            })
            .collect()
    }

    /// Live uploads with their target filenames and extras, ordered by id.
    pub fn materialize(&self, target_prefix: &str) -> Vec<MaterializedUpload> {
        let prefix = &self.config.upload_prefix;
        self.uploads
            .iter()
            .map(|upload| {
                let id = upload.id.to_string();
                MaterializedUpload {
                    field_name: format!("{prefix}{id}"),
                    target_name: format!("{target_prefix}-{id}{}", upload.extension()),
                    extras: self.extras(prefix, &id),
                    upload: upload.clone(),
                }
            })
            .collect()
    }

    /// Live saved files with their extras, in the caller's order.
    pub fn saved(&self) -> impl Iterator<Item = (&T, Extras)> + '_ {
        self.saved
            .iter()
            .map(|object| (object, self.extras(&self.config.saved_prefix, &object.identifier())))
    }

    /// Add the synthesized fields to a form.
    pub fn apply_to(&self, form: &mut Form) {
        form.elements
            .extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Synthesized fields keyed by name.
    pub fn fields(&self) -> &BTreeMap<String, FormElement> {
        &self.fields
    }

    /// Submitted identifiers that were dropped.
    pub fn misses(&self) -> &[ReconciliationMiss] {
        &self.misses
    }

    /// The nonce resolved from the submitted data, if uploads were
    /// referenced and it resolved.
    pub fn nonce(&self) -> Option<&Nonce> {
        self.nonce.as_ref()
    }

    /// Ids of the live uploads.
    pub fn upload_ids(&self) -> Vec<i64> {
        self.uploads.iter().map(|u| u.id).collect()
    }

    /// Identifiers of the live saved files.
    pub fn saved_ids(&self) -> Vec<String> {
        self.saved.iter().map(SaveableObject::identifier).collect()
    }

    /// Whether the form was built from submitted data.
    pub fn is_submitted(&self) -> bool {
        self.submitted.is_some()
    }
}

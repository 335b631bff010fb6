//! Form and form element types.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Submitted form values keyed by field name.
pub type FormValues = HashMap<String, Value>;

/// The fields of a form that nonced and retained uploads are added to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    /// Unique form identifier (e.g., "gallery_edit_form").
    pub form_id: String,

    /// Form elements keyed by name.
    pub elements: BTreeMap<String, FormElement>,
}

impl Form {
    pub fn new(form_id: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            elements: BTreeMap::new(),
        }
    }

    /// Add an element to the form.
    pub fn element(mut self, name: impl Into<String>, element: FormElement) -> Self {
        self.elements.insert(name.into(), element);
        self
    }

    pub fn get_element_mut(&mut self, name: &str) -> Option<&mut FormElement> {
        self.elements.get_mut(name)
    }
}

/// A form element definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormElement {
    #[serde(flatten)]
    pub element_type: ElementType,

    /// Label; for reference fields, the URL of the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FormElement {
    /// Create a textfield element.
    pub fn textfield() -> Self {
        Self::new(ElementType::Textfield { max_length: None })
    }

    /// Create a hidden field.
    pub fn hidden() -> Self {
        Self::new(ElementType::Hidden { max_length: None })
    }

    fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            title: None,
            default_value: None,
        }
    }

    /// Set the element title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set the maximum input length.
    pub fn max_length(mut self, max: usize) -> Self {
        match self.element_type {
            ElementType::Textfield { ref mut max_length }
            | ElementType::Hidden { ref mut max_length } => *max_length = Some(max),
        }
        self
    }
}

/// Element type variants with type-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementType {
    /// Single-line text input.
    Textfield {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },

    /// Hidden text value that survives round-trips.
    Hidden {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
}

/// A validation failure attached to a form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    /// Create a field-level error.
    pub fn field(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(name.into()),
            message: message.into(),
        }
    }
}

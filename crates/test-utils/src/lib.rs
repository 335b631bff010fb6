#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Tether test utilities.
//!
//! Helpers for integration testing: image fixtures, submitted form value
//! builders, and hand-built multipart request bodies.

use std::collections::HashMap;
use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A fresh user id.
pub fn test_user() -> Uuid {
    Uuid::now_v7()
}

/// Encode a small solid image in the given format.
pub fn image_bytes(format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)
        .expect("Failed to encode test image");
    out.into_inner()
}

/// A decodable PNG.
pub fn png_bytes() -> Vec<u8> {
    image_bytes(ImageFormat::Png)
}

/// A decodable GIF.
pub fn gif_bytes() -> Vec<u8> {
    image_bytes(ImageFormat::Gif)
}

/// Start building submitted form values.
pub fn form_values() -> FormValuesBuilder {
    FormValuesBuilder::default()
}

/// Builder for submitted form values, as a form handler would receive them.
#[derive(Debug, Clone, Default)]
pub struct FormValuesBuilder {
    values: HashMap<String, JsonValue>,
}

impl FormValuesBuilder {
    /// Set a field value.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Add a hidden upload reference, e.g. `upload_5` = "5".
    pub fn reference(self, prefix: &str, id: impl ToString) -> Self {
        let id = id.to_string();
        self.field(format!("{prefix}{id}"), id)
    }

    /// Finish building.
    pub fn build(self) -> HashMap<String, JsonValue> {
        self.values
    }
}

/// Builder for `multipart/form-data` request bodies.
#[derive(Debug, Clone)]
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    /// Create an empty body with a fixed boundary.
    pub fn new() -> Self {
        Self {
            boundary: "tether-test-boundary-7MA4YWxkTrZu0gW".to_string(),
            body: Vec::new(),
        }
    }

    /// Add a text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    /// Add a file field.
    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Finish the body.
    pub fn build(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}

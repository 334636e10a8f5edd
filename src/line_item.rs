// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Line item data structures.
//!
//! Two shapes flow through the engine:
//!
//! - [`LineItemInput`] is what callers hand us. It is untrusted: field names
//!   may follow either naming convention (`product_id` or `productId`),
//!   numbers may arrive as strings, dates as strings, epoch millis or
//!   [`chrono`] values.
//! - [`CanonicalLineItemRecord`] is the storage-ready row produced by the
//!   [`PayloadBuilder`](crate::payload::PayloadBuilder).
//!
//! # Field aliases
//!
//! Every accepted spelling lives in [`FIELD_ALIASES`]. Normalization consults
//! that table once, in [`LineItemInput::from_json`], so nothing downstream
//! needs to know which convention the caller used.
//!
//! ```
//! use line_item_sync::LineItemInput;
//! use serde_json::json;
//!
//! let snake = LineItemInput::from_json(&json!({"product_id": "p-1", "unit_price": 10}));
//! let camel = LineItemInput::from_json(&json!({"productId": "p-1", "unitPrice": 10}));
//!
//! assert_eq!(snake.product_id, camel.product_id);
//! assert_eq!(snake.unit_price, camel.unit_price);
//! ```

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical field identifiers for line item input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineItemField {
    ProductId,
    VendorId,
    Quantity,
    UnitPrice,
    PromisedDate,
    RequiresScheduling,
    NoScheduleReason,
    IsOffSite,
    ScheduledStartTime,
    ScheduledEndTime,
}

impl LineItemField {
    /// Storage column name (also the snake_case input spelling).
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::ProductId => "product_id",
            Self::VendorId => "vendor_id",
            Self::Quantity => "quantity_used",
            Self::UnitPrice => "unit_price",
            Self::PromisedDate => "promised_date",
            Self::RequiresScheduling => "requires_scheduling",
            Self::NoScheduleReason => "no_schedule_reason",
            Self::IsOffSite => "is_off_site",
            Self::ScheduledStartTime => "scheduled_start_time",
            Self::ScheduledEndTime => "scheduled_end_time",
        }
    }

    /// All accepted input spellings, in lookup priority order.
    #[must_use]
    pub fn aliases(self) -> &'static [&'static str] {
        FIELD_ALIASES
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, names)| *names)
            .unwrap_or(&[])
    }
}

/// Accepted input spellings per field.
///
/// The first entry is the storage column name; the camelCase spelling used by
/// form code follows. Lookup stops at the first alias whose value is present
/// and non-null.
pub const FIELD_ALIASES: &[(LineItemField, &[&str])] = &[
    (LineItemField::ProductId, &["product_id", "productId"]),
    (LineItemField::VendorId, &["vendor_id", "vendorId"]),
    (LineItemField::Quantity, &["quantity_used", "quantityUsed", "quantity"]),
    (LineItemField::UnitPrice, &["unit_price", "unitPrice"]),
    (LineItemField::PromisedDate, &["promised_date", "promisedDate"]),
    (LineItemField::RequiresScheduling, &["requires_scheduling", "requiresScheduling"]),
    (LineItemField::NoScheduleReason, &["no_schedule_reason", "noScheduleReason"]),
    (LineItemField::IsOffSite, &["is_off_site", "isOffSite"]),
    (LineItemField::ScheduledStartTime, &["scheduled_start_time", "scheduledStartTime"]),
    (LineItemField::ScheduledEndTime, &["scheduled_end_time", "scheduledEndTime"]),
];

/// A date or timestamp as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DateValue {
    /// A real point in time; normalized to an RFC 3339 UTC string.
    Instant(DateTime<Utc>),
    /// Free text (usually already ISO-8601); passed through when non-blank.
    Text(String),
}

impl DateValue {
    /// Normalize to the stored representation.
    ///
    /// Instants become `YYYY-MM-DDTHH:MM:SS.sssZ`. Blank text becomes `None`.
    #[must_use]
    pub fn normalize(&self) -> Option<String> {
        match self {
            Self::Instant(at) => Some(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Text(text) => {
                if text.trim().is_empty() {
                    None
                } else {
                    Some(text.clone())
                }
            }
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            // Epoch milliseconds
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(Self::Instant),
            _ => None,
        }
    }
}

impl From<DateTime<Utc>> for DateValue {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Instant(at)
    }
}

impl From<&str> for DateValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for DateValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Caller-supplied line item, after alias resolution but before coercion.
///
/// Numeric fields keep their raw JSON value so the builder can apply the
/// documented defaults on parse failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineItemInput {
    pub product_id: Option<String>,
    pub vendor_id: Option<String>,
    pub quantity: Option<Value>,
    pub unit_price: Option<Value>,
    pub promised_date: Option<DateValue>,
    pub requires_scheduling: Option<bool>,
    pub no_schedule_reason: Option<String>,
    pub is_off_site: Option<bool>,
    pub scheduled_start_time: Option<DateValue>,
    pub scheduled_end_time: Option<DateValue>,
}

impl LineItemInput {
    /// Start an input for a product.
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_vendor(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = Some(vendor_id.into());
        self
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(Value::from(quantity));
        self
    }

    #[must_use]
    pub fn with_unit_price(mut self, unit_price: f64) -> Self {
        self.unit_price = Some(Value::from(unit_price));
        self
    }

    #[must_use]
    pub fn with_promised_date(mut self, date: impl Into<DateValue>) -> Self {
        self.promised_date = Some(date.into());
        self
    }

    #[must_use]
    pub fn with_schedule(mut self, start: impl Into<DateValue>, end: impl Into<DateValue>) -> Self {
        self.scheduled_start_time = Some(start.into());
        self.scheduled_end_time = Some(end.into());
        self
    }

    #[must_use]
    pub fn with_requires_scheduling(mut self, requires: bool) -> Self {
        self.requires_scheduling = Some(requires);
        self
    }

    #[must_use]
    pub fn with_no_schedule_reason(mut self, reason: impl Into<String>) -> Self {
        self.no_schedule_reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_off_site(mut self, off_site: bool) -> Self {
        self.is_off_site = Some(off_site);
        self
    }

    /// Normalize an arbitrary JSON value through the alias table.
    ///
    /// Non-object values produce an empty input (which the builder drops for
    /// lack of a product reference).
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        Self {
            product_id: lookup(obj, LineItemField::ProductId).and_then(reference),
            vendor_id: lookup(obj, LineItemField::VendorId).and_then(reference),
            quantity: lookup(obj, LineItemField::Quantity).cloned(),
            unit_price: lookup(obj, LineItemField::UnitPrice).cloned(),
            promised_date: lookup(obj, LineItemField::PromisedDate).and_then(DateValue::from_json),
            requires_scheduling: lookup(obj, LineItemField::RequiresScheduling).and_then(flag),
            no_schedule_reason: lookup(obj, LineItemField::NoScheduleReason)
                .and_then(Value::as_str)
                .map(String::from),
            is_off_site: lookup(obj, LineItemField::IsOffSite).and_then(flag),
            scheduled_start_time: lookup(obj, LineItemField::ScheduledStartTime)
                .and_then(DateValue::from_json),
            scheduled_end_time: lookup(obj, LineItemField::ScheduledEndTime)
                .and_then(DateValue::from_json),
        }
    }
}

impl From<Value> for LineItemInput {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

impl<'de> Deserialize<'de> for LineItemInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(|v| Self::from_json(&v))
    }
}

fn lookup(obj: &Map<String, Value>, field: LineItemField) -> Option<&Value> {
    field
        .aliases()
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

/// IDs arrive as strings or (occasionally) bare numbers.
fn reference(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

/// A typed column value, as handed to a storage backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Real(f64),
    Bool(bool),
}

/// Storage-ready line item row.
///
/// `vendor_id` and the scheduled times use `Option<Option<_>>`: the outer
/// `None` means the column is excluded from the payload entirely (capability
/// disabled), `Some(None)` means the column is written as NULL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalLineItemRecord {
    pub job_id: String,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<Option<String>>,
    pub quantity_used: f64,
    pub unit_price: f64,
    pub promised_date: Option<String>,
    pub requires_scheduling: bool,
    pub no_schedule_reason: Option<String>,
    pub is_off_site: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_start_time: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end_time: Option<Option<String>>,
}

impl CanonicalLineItemRecord {
    /// Vendor reference, if the column is included and non-null.
    #[must_use]
    pub fn vendor(&self) -> Option<&str> {
        self.vendor_id.as_ref().and_then(|v| v.as_deref())
    }

    #[must_use]
    pub fn scheduled_start(&self) -> Option<&str> {
        self.scheduled_start_time.as_ref().and_then(|v| v.as_deref())
    }

    #[must_use]
    pub fn scheduled_end(&self) -> Option<&str> {
        self.scheduled_end_time.as_ref().and_then(|v| v.as_deref())
    }

    /// Column names and values this record writes, in a stable order.
    ///
    /// Excluded optional columns are absent rather than NULL.
    #[must_use]
    pub fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        let mut cols = Vec::with_capacity(11);
        cols.push(("job_id", ColumnValue::Text(Some(self.job_id.clone()))));
        cols.push((
            LineItemField::ProductId.column(),
            ColumnValue::Text(Some(self.product_id.clone())),
        ));
        if let Some(ref vendor) = self.vendor_id {
            cols.push((LineItemField::VendorId.column(), ColumnValue::Text(vendor.clone())));
        }
        cols.push((LineItemField::Quantity.column(), ColumnValue::Real(self.quantity_used)));
        cols.push((LineItemField::UnitPrice.column(), ColumnValue::Real(self.unit_price)));
        cols.push((
            LineItemField::PromisedDate.column(),
            ColumnValue::Text(self.promised_date.clone()),
        ));
        cols.push((
            LineItemField::RequiresScheduling.column(),
            ColumnValue::Bool(self.requires_scheduling),
        ));
        cols.push((
            LineItemField::NoScheduleReason.column(),
            ColumnValue::Text(self.no_schedule_reason.clone()),
        ));
        cols.push((LineItemField::IsOffSite.column(), ColumnValue::Bool(self.is_off_site)));
        if let Some(ref start) = self.scheduled_start_time {
            cols.push((LineItemField::ScheduledStartTime.column(), ColumnValue::Text(start.clone())));
        }
        if let Some(ref end) = self.scheduled_end_time {
            cols.push((LineItemField::ScheduledEndTime.column(), ColumnValue::Text(end.clone())));
        }
        cols
    }

    /// Just the column names (see [`columns`](Self::columns)).
    #[must_use]
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().into_iter().map(|(name, _)| name).collect()
    }
}

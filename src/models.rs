use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::{InventoryError, Result};

pub type BranchId = i64;

const MAX_TEXT_LEN: usize = 255;
static MAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Result of the last stocktake scan for a book.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum InventoryFlag {
  #[default]
  Unset,
  Found,
  NotFound,
}

impl ToSql for InventoryFlag {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    let value = match self {
      InventoryFlag::Unset => Value::Null,
      InventoryFlag::Found => Value::Integer(1),
      InventoryFlag::NotFound => Value::Integer(0),
    };
    Ok(ToSqlOutput::Owned(value))
  }
}

impl FromSql for InventoryFlag {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    match value {
      ValueRef::Null => Ok(InventoryFlag::Unset),
      ValueRef::Integer(1) => Ok(InventoryFlag::Found),
      ValueRef::Integer(0) => Ok(InventoryFlag::NotFound),
      ValueRef::Integer(other) => Err(FromSqlError::OutOfRange(other)),
      _ => Err(FromSqlError::InvalidType),
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
  pub id: Uuid,
  pub branch_id: Option<BranchId>,
  pub added: DateTime<Utc>,
  pub title: String,
  pub subtitle: Option<String>,
  pub short_description: Option<String>,
  pub author_id: Option<i64>,
  pub genre_id: Option<i64>,
  pub format_id: i64,
  pub condition_id: Option<i64>,
  pub price: f64,
  pub release_year: i32,
  pub tags: Vec<i64>,
  pub recommendation: bool,
  pub duplicate: bool,
  pub sold: bool,
  pub sold_on: Option<DateTime<Utc>>,
  pub removed: bool,
  pub removed_on: Option<DateTime<Utc>>,
  pub reserved: bool,
  pub reserved_at: Option<DateTime<Utc>>,
  pub reservation_id: Option<Uuid>,
  pub inventory: InventoryFlag,
}

impl Book {
  /// Fresh intake record: unsold, unremoved, unreserved, not yet counted.
  pub fn from_draft(draft: BookDraft, now: DateTime<Utc>) -> Self {
    let mut tags = draft.tags;
    tags.sort_unstable();
    tags.dedup();
    Book {
      id: Uuid::new_v4(),
      branch_id: draft.branch_id,
      added: now,
      title: draft.title,
      subtitle: draft.subtitle,
      short_description: draft.short_description,
      author_id: draft.author_id,
      genre_id: draft.genre_id,
      format_id: draft.format_id,
      condition_id: draft.condition_id,
      price: draft.price,
      release_year: draft.release_year,
      tags,
      recommendation: draft.recommendation,
      duplicate: draft.duplicate,
      sold: false,
      sold_on: None,
      removed: false,
      removed_on: None,
      reserved: false,
      reserved_at: None,
      reservation_id: None,
      inventory: InventoryFlag::Unset,
    }
  }

  /// Unassigned books are global; anything else belongs to exactly one branch.
  pub fn is_accessible_by(&self, branch: BranchId) -> bool {
    self.branch_id.map_or(true, |owner| owner == branch)
  }

  pub fn is_owned_by(&self, branch: BranchId) -> bool {
    self.branch_id == Some(branch)
  }

  pub fn validate(&self) -> Result<()> {
    let title_len = self.title.chars().count();
    if title_len == 0 || title_len > MAX_TEXT_LEN {
      return Err(InventoryError::ValidationFailed(
        "title must be between 1 and 255 characters".to_string(),
      ));
    }
    if let Some(subtitle) = &self.subtitle {
      if subtitle.chars().count() > MAX_TEXT_LEN {
        return Err(InventoryError::ValidationFailed(
          "subtitle must be at most 255 characters".to_string(),
        ));
      }
    }
    if !self.price.is_finite() || self.price < 0.0 {
      return Err(InventoryError::ValidationFailed(
        "price must be a non-negative amount".to_string(),
      ));
    }
    if !(1000..=9999).contains(&self.release_year) {
      return Err(InventoryError::ValidationFailed(
        "release year must have four digits".to_string(),
      ));
    }
    Ok(())
  }
}

/// Descriptive fields supplied on intake.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BookDraft {
  pub branch_id: Option<BranchId>,
  pub title: String,
  #[serde(default)]
  pub subtitle: Option<String>,
  #[serde(default)]
  pub short_description: Option<String>,
  #[serde(default)]
  pub author_id: Option<i64>,
  #[serde(default)]
  pub genre_id: Option<i64>,
  pub format_id: i64,
  #[serde(default)]
  pub condition_id: Option<i64>,
  #[serde(default)]
  pub price: f64,
  pub release_year: i32,
  #[serde(default)]
  pub tags: Vec<i64>,
  #[serde(default)]
  pub recommendation: bool,
  #[serde(default)]
  pub duplicate: bool,
}

/// Partial update; `None` leaves a field untouched. Nullable references use
/// a nested option so they can be cleared.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BookPatch {
  pub title: Option<String>,
  pub subtitle: Option<Option<String>>,
  pub short_description: Option<Option<String>>,
  pub author_id: Option<Option<i64>>,
  pub genre_id: Option<Option<i64>>,
  pub format_id: Option<i64>,
  pub condition_id: Option<Option<i64>>,
  pub price: Option<f64>,
  pub release_year: Option<i32>,
  pub tags: Option<Vec<i64>>,
  pub recommendation: Option<bool>,
  pub duplicate: Option<bool>,
  pub sold: Option<bool>,
  pub removed: Option<bool>,
  pub reserved: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Salutation {
  M,
  F,
  D,
}

impl Salutation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Salutation::M => "m",
      Salutation::F => "f",
      Salutation::D => "d",
    }
  }
}

impl FromStr for Salutation {
  type Err = InventoryError;

  fn from_str(value: &str) -> Result<Self> {
    match value.trim() {
      "m" => Ok(Salutation::M),
      "f" => Ok(Salutation::F),
      "d" => Ok(Salutation::D),
      other => Err(InventoryError::ValidationFailed(format!(
        "salutation must be one of m, f, d (got \"{}\")",
        other
      ))),
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
  pub id: Uuid,
  pub branch_id: BranchId,
  pub created_at: DateTime<Utc>,
  pub notes: String,
  pub salutation: Salutation,
  pub firstname: String,
  pub surname: String,
  pub mail: String,
  pub phone: String,
  pub open: bool,
}

/// Customer contact fields shared by create and update.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomerForm {
  #[serde(default)]
  pub notes: String,
  pub salutation: String,
  pub firstname: String,
  pub surname: String,
  pub mail: String,
  #[serde(default)]
  pub phone: String,
}

pub(crate) struct ValidCustomer {
  pub salutation: Salutation,
  pub firstname: String,
  pub surname: String,
  pub mail: String,
  pub phone: String,
  pub notes: String,
}

impl CustomerForm {
  pub(crate) fn validate(&self) -> Result<ValidCustomer> {
    let salutation = self.salutation.parse::<Salutation>()?;
    let firstname = required_text("firstname", &self.firstname)?;
    let surname = required_text("surname", &self.surname)?;
    let mail = required_text("mail", &self.mail)?;
    if !mail_pattern().is_match(&mail) {
      return Err(InventoryError::ValidationFailed(format!(
        "mail \"{}\" is not a valid address",
        mail
      )));
    }
    let phone = self.phone.trim().to_string();
    if phone.chars().count() > MAX_TEXT_LEN {
      return Err(InventoryError::ValidationFailed(
        "phone must be at most 255 characters".to_string(),
      ));
    }
    Ok(ValidCustomer {
      salutation,
      firstname,
      surname,
      mail,
      phone,
      notes: self.notes.clone(),
    })
  }
}

fn required_text(field: &str, value: &str) -> Result<String> {
  let trimmed = value.trim();
  if trimmed.is_empty() {
    return Err(InventoryError::ValidationFailed(format!("{} is required", field)));
  }
  if trimmed.chars().count() > MAX_TEXT_LEN {
    return Err(InventoryError::ValidationFailed(format!(
      "{} must be at most 255 characters",
      field
    )));
  }
  Ok(trimmed.to_string())
}

fn mail_pattern() -> &'static Regex {
  MAIL_PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid mail pattern"))
}

/// Create payload: contact fields plus the raw comma-separated book IDs.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReservationForm {
  #[serde(flatten)]
  pub customer: CustomerForm,
  #[serde(default)]
  pub books: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReservationUpdateForm {
  #[serde(flatten)]
  pub customer: CustomerForm,
  pub open: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StocktakeSession {
  pub id: i64,
  pub branch_id: BranchId,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
  pub found: i64,
  pub not_found: i64,
}

impl StocktakeSession {
  pub fn is_open(&self) -> bool {
    self.ended_at.is_none()
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
  EUR,
  USD,
}

impl Currency {
  pub fn code(&self) -> &'static str {
    match self {
      Currency::EUR => "EUR",
      Currency::USD => "USD",
    }
  }

  pub fn from_code(code: &str) -> Option<Self> {
    match code {
      "EUR" => Some(Currency::EUR),
      "USD" => Some(Currency::USD),
      _ => None,
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
  pub id: BranchId,
  pub name: String,
  pub currency: Currency,
  pub public: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoverSize {
  Small,
  Medium,
  Large,
}

impl CoverSize {
  pub const ALL: [CoverSize; 3] = [CoverSize::Large, CoverSize::Medium, CoverSize::Small];

  pub fn width(&self) -> u32 {
    match self {
      CoverSize::Large => 400,
      CoverSize::Medium => 200,
      CoverSize::Small => 100,
    }
  }

  pub fn suffix(&self) -> &'static str {
    match self {
      CoverSize::Large => "l",
      CoverSize::Medium => "m",
      CoverSize::Small => "s",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn draft() -> BookDraft {
    BookDraft {
      branch_id: Some(1),
      title: "Momo".to_string(),
      format_id: 2,
      price: 4.5,
      release_year: 1973,
      tags: vec![3, 1, 3],
      ..BookDraft::default()
    }
  }

  fn customer() -> CustomerForm {
    CustomerForm {
      notes: String::new(),
      salutation: "f".to_string(),
      firstname: "Ada".to_string(),
      surname: "Lovelace".to_string(),
      mail: "ada@example.org".to_string(),
      phone: String::new(),
    }
  }

  #[test]
  fn intake_starts_in_neutral_state() {
    let book = Book::from_draft(draft(), Utc::now());
    assert!(!book.sold && book.sold_on.is_none());
    assert!(!book.removed && book.removed_on.is_none());
    assert!(!book.reserved && book.reserved_at.is_none() && book.reservation_id.is_none());
    assert_eq!(book.inventory, InventoryFlag::Unset);
    assert_eq!(book.tags, vec![1, 3]);
  }

  #[test]
  fn rejects_out_of_range_fields() {
    let mut book = Book::from_draft(draft(), Utc::now());
    assert!(book.validate().is_ok());

    book.release_year = 999;
    assert!(matches!(book.validate(), Err(InventoryError::ValidationFailed(_))));

    book.release_year = 2020;
    book.price = -0.01;
    assert!(matches!(book.validate(), Err(InventoryError::ValidationFailed(_))));

    book.price = 1.0;
    book.title = String::new();
    assert!(matches!(book.validate(), Err(InventoryError::ValidationFailed(_))));
  }

  #[test]
  fn unassigned_books_are_accessible_but_not_owned() {
    let mut book = Book::from_draft(draft(), Utc::now());
    book.branch_id = None;
    assert!(book.is_accessible_by(7));
    assert!(!book.is_owned_by(7));
  }

  #[test]
  fn customer_form_requires_contact_fields() {
    assert!(customer().validate().is_ok());

    let mut form = customer();
    form.salutation = "x".to_string();
    assert!(matches!(form.validate(), Err(InventoryError::ValidationFailed(_))));

    let mut form = customer();
    form.mail = "not-an-address".to_string();
    assert!(matches!(form.validate(), Err(InventoryError::ValidationFailed(_))));

    let mut form = customer();
    form.surname = " ".to_string();
    assert!(matches!(form.validate(), Err(InventoryError::ValidationFailed(_))));
  }

  #[test]
  fn reservation_form_reads_flat_json() {
    let form: ReservationForm = serde_json::from_str(
      r#"{"salutation":"m","firstname":"Max","surname":"Muster","mail":"max@example.org","books":"a, b"}"#,
    )
    .expect("form should parse");
    assert_eq!(form.customer.firstname, "Max");
    assert_eq!(form.books, "a, b");
  }
}

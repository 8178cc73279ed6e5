//! Row cleaners: apply the field normalizers to one raw row and yield
//! either a canonical record or a rejection reason.
//!
//! Only identity fields are hard requirements; a bad optional field
//! (phone, email, date) nulls that field without rejecting the row.

use uuid::Uuid;

use crate::error::ReasonCode;
use crate::gender::{self, Gender};
use crate::index::CustomerIndex;
use crate::models::{
    CanonicalCustomer, CanonicalItemSale, CanonicalPayment, CanonicalServiceSale,
    CanonicalTransaction, SourceFile, VisitSummary,
};
use crate::normalize;
use crate::reader::RawRow;

// Column-name aliases seen across POS export versions. Lookup is
// case-insensitive, exact match before substring match.
const MEMBERSHIP_COLUMNS: &[&str] = &[
    "membership no",
    "membership number",
    "member no",
    "member id",
    "membership",
];
const NAME_COLUMNS: &[&str] = &["customer name", "member name", "name"];
const GENDER_COLUMNS: &[&str] = &["gender", "sex"];
const PHONE_COLUMNS: &[&str] = &["mobile", "phone", "contact no", "tel", "h/p", "hp"];
const EMAIL_COLUMNS: &[&str] = &["email", "e-mail"];
const ADDRESS_COLUMNS: &[&str] = &["address 1", "address"];
const CITY_COLUMNS: &[&str] = &["city", "town"];
const STATE_COLUMNS: &[&str] = &["state"];
const POSTCODE_COLUMNS: &[&str] = &["postcode", "postal code", "zip"];
const COUNTRY_COLUMNS: &[&str] = &["country"];
const DOB_COLUMNS: &[&str] = &["date of birth", "dob", "birth date", "birthday"];
const REGISTRATION_COLUMNS: &[&str] = &[
    "registration date",
    "register date",
    "join date",
    "created date",
];
const TRANSACTION_ID_COLUMNS: &[&str] = &[
    "receipt no",
    "invoice no",
    "bill no",
    "transaction no",
    "doc no",
];
const DATE_COLUMNS: &[&str] = &["transaction date", "sales date", "date"];
const AMOUNT_COLUMNS: &[&str] = &["grand total", "nett amount", "total", "amount"];
const PAYMENT_METHOD_COLUMNS: &[&str] = &["payment method", "payment type", "method"];
const ITEM_COLUMNS: &[&str] = &["item name", "item", "product"];
const SERVICE_COLUMNS: &[&str] = &["service name", "service"];
const QUANTITY_COLUMNS: &[&str] = &["qty", "quantity"];
const VISIT_COUNT_COLUMNS: &[&str] = &["visit count", "no of visits", "visits", "frequency"];
const LAST_VISIT_COLUMNS: &[&str] = &["last visit date", "last visit"];
const TOTAL_SPENT_COLUMNS: &[&str] = &["total spent", "total spending", "total sales"];

/// Deterministic surrogate key for rows whose source carries no
/// explicit transaction id. Derived from stable row coordinates so
/// re-importing unchanged files yields the same keys.
pub fn surrogate_key(source: SourceFile, row_index: usize, membership_number: &str) -> String {
    let seed = format!("{}:{}:{}", source.as_str(), row_index, membership_number);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

fn parse_gender(raw: &str) -> Option<Gender> {
    match raw.trim().to_lowercase().as_str() {
        "m" | "male" | "lelaki" => Some(Gender::Male),
        "f" | "female" | "perempuan" => Some(Gender::Female),
        _ => None,
    }
}

/// Clean one customer row. Membership number and name are required;
/// a membership number already accepted this run is a duplicate.
pub fn clean_customer(
    row: &RawRow,
    index: &CustomerIndex,
) -> Result<CanonicalCustomer, ReasonCode> {
    let membership_number = row
        .get(MEMBERSHIP_COLUMNS)
        .ok_or(ReasonCode::MissingRequiredField)?
        .to_string();
    let name = row
        .get(NAME_COLUMNS)
        .ok_or(ReasonCode::MissingRequiredField)?
        .to_string();
    if index.contains(&membership_number) {
        return Err(ReasonCode::DuplicateKey);
    }

    let gender = row
        .get(GENDER_COLUMNS)
        .and_then(parse_gender)
        .unwrap_or_else(|| gender::classify(&name));

    Ok(CanonicalCustomer {
        membership_number,
        gender,
        phone: row.get(PHONE_COLUMNS).and_then(normalize::phone),
        email: row.get(EMAIL_COLUMNS).and_then(normalize::email),
        address: row.get(ADDRESS_COLUMNS).unwrap_or_default().to_string(),
        city: row.get(CITY_COLUMNS).unwrap_or_default().to_string(),
        state: normalize::state(row.get(STATE_COLUMNS).unwrap_or_default()),
        postcode: row.get(POSTCODE_COLUMNS).and_then(normalize::postcode),
        country: normalize::country(row.get(COUNTRY_COLUMNS).unwrap_or_default()),
        date_of_birth: row.get(DOB_COLUMNS).and_then(normalize::date),
        registration_date: row.get(REGISTRATION_COLUMNS).and_then(normalize::date),
        total_spending: 0.0,
        visit_count: 0,
        last_visit_date: None,
        name,
    })
}

fn known_membership(row: &RawRow, index: &CustomerIndex) -> Result<String, ReasonCode> {
    let membership_number = row
        .get(MEMBERSHIP_COLUMNS)
        .ok_or(ReasonCode::MissingRequiredField)?;
    if !index.contains(membership_number) {
        return Err(ReasonCode::UnknownCustomerReference);
    }
    Ok(membership_number.to_string())
}

pub fn clean_visit_summary(
    row: &RawRow,
    index: &CustomerIndex,
) -> Result<VisitSummary, ReasonCode> {
    let membership_number = known_membership(row, index)?;
    Ok(VisitSummary {
        membership_number,
        visit_count: row
            .get(VISIT_COUNT_COLUMNS)
            .and_then(normalize::amount)
            .map(|v| v as i64)
            .unwrap_or(0),
        last_visit_date: row.get(LAST_VISIT_COLUMNS).and_then(normalize::date),
        total_spent: row
            .get(TOTAL_SPENT_COLUMNS)
            .and_then(normalize::amount)
            .unwrap_or(0.0),
    })
}

pub fn clean_transaction(
    row: &RawRow,
    index: &CustomerIndex,
) -> Result<CanonicalTransaction, ReasonCode> {
    let membership_number = known_membership(row, index)?;
    let transaction_id = row
        .get(TRANSACTION_ID_COLUMNS)
        .map(str::to_string)
        .unwrap_or_else(|| surrogate_key(SourceFile::Sales, row.index, &membership_number));
    Ok(CanonicalTransaction {
        transaction_id,
        transaction_date: row.get(DATE_COLUMNS).and_then(normalize::date),
        total_amount: row
            .get(AMOUNT_COLUMNS)
            .and_then(normalize::amount)
            .unwrap_or(0.0),
        membership_number,
    })
}

pub fn clean_payment(
    row: &RawRow,
    index: &CustomerIndex,
) -> Result<CanonicalPayment, ReasonCode> {
    let membership_number = known_membership(row, index)?;
    let payment_id = row
        .get(TRANSACTION_ID_COLUMNS)
        .map(str::to_string)
        .unwrap_or_else(|| surrogate_key(SourceFile::Payments, row.index, &membership_number));
    Ok(CanonicalPayment {
        payment_id,
        payment_date: row.get(DATE_COLUMNS).and_then(normalize::date),
        amount: row
            .get(AMOUNT_COLUMNS)
            .and_then(normalize::amount)
            .unwrap_or(0.0),
        method: row.get(PAYMENT_METHOD_COLUMNS).map(str::to_string),
        membership_number,
    })
}

pub fn clean_item_sale(
    row: &RawRow,
    index: &CustomerIndex,
) -> Result<CanonicalItemSale, ReasonCode> {
    let membership_number = known_membership(row, index)?;
    let item_name = row
        .get(ITEM_COLUMNS)
        .ok_or(ReasonCode::MissingRequiredField)?
        .to_string();
    // One receipt can carry several line items, so the receipt number
    // is not a usable key here.
    let sale_id = surrogate_key(SourceFile::ItemSales, row.index, &membership_number);
    Ok(CanonicalItemSale {
        sale_id,
        item_name,
        quantity: row
            .get(QUANTITY_COLUMNS)
            .and_then(normalize::amount)
            .unwrap_or(1.0),
        amount: row
            .get(AMOUNT_COLUMNS)
            .and_then(normalize::amount)
            .unwrap_or(0.0),
        sale_date: row.get(DATE_COLUMNS).and_then(normalize::date),
        membership_number,
    })
}

pub fn clean_service_sale(
    row: &RawRow,
    index: &CustomerIndex,
) -> Result<CanonicalServiceSale, ReasonCode> {
    let membership_number = known_membership(row, index)?;
    let service_name = row
        .get(SERVICE_COLUMNS)
        .ok_or(ReasonCode::MissingRequiredField)?
        .to_string();
    let sale_id = surrogate_key(SourceFile::ServiceSales, row.index, &membership_number);
    Ok(CanonicalServiceSale {
        sale_id,
        service_name,
        amount: row
            .get(AMOUNT_COLUMNS)
            .and_then(normalize::amount)
            .unwrap_or(0.0),
        sale_date: row.get(DATE_COLUMNS).and_then(normalize::date),
        membership_number,
    })
}

// =============================================================================
// TESTS
// =============================================================================

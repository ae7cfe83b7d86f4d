//! Shared primitive types and client-code conventions.

use chrono::{Duration, NaiveDate};

/// The canonical pipeline run identifier.
pub type RunId = String;

/// A settlement business day.
pub type BusinessDate = NaiveDate;

/// Ledger party codes carry this leading tag; short-delivery rows do not.
pub const DEFAULT_CLIENT_TAG: char = 'C';

/// The business day a run reconciles: the calendar day before `run_date`.
pub fn business_date_for(run_date: NaiveDate) -> BusinessDate {
    run_date - Duration::days(1)
}

/// Strip a single leading `tag` from a ledger party code.
/// Codes without the tag pass through trimmed but otherwise untouched.
pub fn detag_client_id(party_cd: &str, tag: char) -> String {
    let trimmed = party_cd.trim();
    trimmed.strip_prefix(tag).unwrap_or(trimmed).to_string()
}

/// Re-apply the ledger tag to a normalized client id to form the
/// contact-directory key.
pub fn retag_client_id(client_id: &str, tag: char) -> String {
    format!("{tag}{}", client_id.trim())
}

/// Format a business date the way the store keys cohorts.
pub fn date_key(date: BusinessDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

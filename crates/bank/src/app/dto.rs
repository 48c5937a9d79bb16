use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use bankbook_accounts::{AccountId, AccountType, MovementKind, UpdateAccount};
use bankbook_core::{Currency, CustomerId};
use bankbook_customers::ContactInfo;

use crate::app::errors::BankError;

// -------------------------
// Value maps
// -------------------------

/// Values accepted when opening an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AccountValues {
    #[serde(default)]
    pub name: String,
    /// Falls back to the configured organization currency.
    #[serde(default)]
    pub currency: Option<Currency>,
    pub begin_balance: Decimal,
    #[serde(default)]
    pub begin_balance_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub credit_line: Decimal,
    #[serde(default, rename = "typeAccount")]
    pub account_type: AccountType,
    /// Owners; the acting principal when absent.
    #[serde(default)]
    pub customers: Option<Vec<CustomerId>>,
}

/// Partial change set of an existing account.
///
/// `beginBalance` and `typeAccount` are accepted here only so that an attempt to
/// change them is reported as an immutability error rather than an unknown field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AccountChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub credit_line: Option<Decimal>,
    #[serde(default)]
    pub customers: Option<Vec<CustomerId>>,
    #[serde(default)]
    pub begin_balance: Option<Decimal>,
    #[serde(default, rename = "typeAccount")]
    pub account_type: Option<AccountType>,
}

impl AccountChanges {
    pub(crate) fn into_command(self, account_id: AccountId, occurred_at: DateTime<Utc>) -> UpdateAccount {
        UpdateAccount {
            account_id,
            name: self.name,
            credit_line: self.credit_line,
            customers: self.customers,
            begin_balance: self.begin_balance,
            account_type: self.account_type,
            occurred_at,
        }
    }
}

/// Values accepted when recording a movement.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovementValues {
    pub account: AccountId,
    pub kind: MovementKind,
    #[serde(default)]
    pub amount: Decimal,
}

/// Customer values; used both for registration and as a partial update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerValues {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl CustomerValues {
    pub(crate) fn contact(&self) -> ContactInfo {
        ContactInfo {
            city: self.city.clone(),
            zip: self.zip.clone(),
            phone: self.phone.clone(),
        }
    }

    /// `None` when no contact field was supplied at all.
    pub(crate) fn contact_changes(&self) -> Option<ContactInfo> {
        if self.city.is_none() && self.zip.is_none() && self.phone.is_none() {
            None
        } else {
            Some(self.contact())
        }
    }
}

/// Deserialize a JSON value map into one of the typed value sets.
///
/// Malformed values, missing required fields and unknown fields are all
/// validation errors.
pub fn from_json<T: DeserializeOwned>(values: JsonValue) -> Result<T, BankError> {
    serde_json::from_value(values).map_err(|e| BankError::Validation(e.to_string()))
}

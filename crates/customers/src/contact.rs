//! Contact-field formats and their advisory mirrors.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use bankbook_core::{Advisory, DomainError, ValueObject};

static LOGIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+$")
        .unwrap_or_else(|e| panic!("login pattern does not compile: {e}"))
});

static CITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\p{Alphabetic}+$")
        .unwrap_or_else(|e| panic!("city pattern does not compile: {e}"))
});

static DIGITS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+$").unwrap_or_else(|e| panic!("digits pattern does not compile: {e}"))
});

const ZIP_LENGTH: usize = 5;

/// Optional contact fields of a customer. Unset fields are never validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub city: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
}

impl ValueObject for ContactInfo {}

impl ContactInfo {
    /// Trimmed copy where blank fields become unset.
    pub fn normalized(&self) -> Self {
        Self {
            city: normalize(self.city.as_deref()),
            zip: normalize(self.zip.as_deref()),
            phone: normalize(self.phone.as_deref()),
        }
    }

    /// Checks city, zip and phone in that order; the first failure wins.
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(city) = &self.city {
            validate_city(city)?;
        }
        if let Some(zip) = &self.zip {
            validate_zip(zip)?;
        }
        if let Some(phone) = &self.phone {
            validate_phone(phone)?;
        }
        Ok(())
    }

    /// Field-wise overlay: fields set in `changes` replace the current ones.
    pub fn merged(&self, changes: &ContactInfo) -> Self {
        Self {
            city: changes.city.clone().or_else(|| self.city.clone()),
            zip: changes.zip.clone().or_else(|| self.zip.clone()),
            phone: changes.phone.clone().or_else(|| self.phone.clone()),
        }
    }
}

pub(crate) fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn validate_login(login: &str) -> Result<(), DomainError> {
    if !LOGIN_PATTERN.is_match(login) {
        return Err(DomainError::validation(format!(
            "login '{login}' must be an email address (name@domain.com)"
        )));
    }
    Ok(())
}

fn validate_city(city: &str) -> Result<(), DomainError> {
    if !CITY_PATTERN.is_match(city) {
        return Err(DomainError::validation("city may only contain letters"));
    }
    Ok(())
}

fn validate_zip(zip: &str) -> Result<(), DomainError> {
    if !DIGITS_PATTERN.is_match(zip) {
        return Err(DomainError::validation("zip code may only contain digits"));
    }
    if zip.len() != ZIP_LENGTH {
        return Err(DomainError::validation("zip code must have exactly 5 digits"));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), DomainError> {
    if !DIGITS_PATTERN.is_match(phone) {
        return Err(DomainError::validation("phone number may only contain digits"));
    }
    Ok(())
}

/// Warnings for every field that would fail validation.
///
/// Never blocks: the same values may still be submitted and will then be rejected
/// by the hard checks.
pub fn advise(login: Option<&str>, contact: &ContactInfo) -> Vec<Advisory> {
    let contact = contact.normalized();
    let mut advisories = Vec::new();

    if normalize(login).is_some_and(|l| validate_login(&l).is_err()) {
        advisories.push(Advisory::new(
            "login",
            "Invalid email",
            "The login must be an email address (name@domain.com).",
        ));
    }
    if contact.city.as_deref().is_some_and(|c| validate_city(c).is_err()) {
        advisories.push(Advisory::new(
            "city",
            "Invalid city",
            "Only letters are allowed.",
        ));
    }
    if contact.zip.as_deref().is_some_and(|z| validate_zip(z).is_err()) {
        advisories.push(Advisory::new(
            "zip",
            "Invalid zip code",
            "The zip code must have exactly 5 digits (e.g. 28001).",
        ));
    }
    if contact.phone.as_deref().is_some_and(|p| validate_phone(p).is_err()) {
        advisories.push(Advisory::new(
            "phone",
            "Invalid phone number",
            "The phone number may only contain digits (e.g. 626170034).",
        ));
    }

    advisories
}

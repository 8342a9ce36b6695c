// src/utils/id_generator.rs
//
// Ids look like `trp-250101-k3x9a`: a kind prefix, the UTC creation date and
// five random characters.
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use std::fmt;

const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Trip,
    Transaction,
}

impl IdKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::Trip => "trp",
            IdKind::Transaction => "txn",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

pub fn new_id(kind: IdKind, at: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARS[rng.random_range(0..SUFFIX_CHARS.len())] as char)
        .collect();
    format!("{}-{}-{}", kind.prefix(), at.format("%y%m%d"), suffix)
}

pub fn generate_trip_id(at: DateTime<Utc>) -> String {
    new_id(IdKind::Trip, at)
}

pub fn generate_transaction_id(at: DateTime<Utc>) -> String {
    new_id(IdKind::Transaction, at)
}

/// True when `id` has the shape of an id of `kind`. Says nothing about whether it exists.
pub fn is_well_formed(id: &str, kind: IdKind) -> bool {
    let mut parts = id.split('-');
    let (Some(prefix), Some(date), Some(suffix), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    prefix == kind.prefix()
        && date.len() == 6
        && NaiveDate::parse_from_str(date, "%y%m%d").is_ok()
        && suffix.len() == SUFFIX_LEN
        && suffix.chars().all(|c| c.is_ascii_alphanumeric())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doctor {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    /// Auth user linked to this doctor, if any.
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Scheduled,
    Lost,
}

/// A prospective patient captured by intake before they book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub status: LeadStatus,
    pub appointment_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Strips everything but digits from a phone number or gateway identity.
pub fn normalize_phone(raw: &str) -> String {
    // "5511999990000@s.whatsapp.net" and "5511999990000:12@..." carry
    // protocol suffixes after the number.
    let number = raw
        .split(['@', ':'])
        .next()
        .unwrap_or_default();
    number.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_phone_strips_suffixes_and_punctuation() {
        assert_eq!(normalize_phone("5511999990000@s.whatsapp.net"), "5511999990000");
        assert_eq!(normalize_phone("5511999990000:7@s.whatsapp.net"), "5511999990000");
        assert_eq!(normalize_phone("+55 (11) 99999-0000"), "5511999990000");
        assert_eq!(normalize_phone(""), "");
    }
}

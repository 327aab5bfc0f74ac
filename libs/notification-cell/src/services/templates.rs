use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use shared_models::notification::{NotificationKind, NotificationPayload};

/// Message bodies per kind. Placeholders: `{nome}`, `{titulo}`, `{quando}`.
fn template(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::ConfirmationOnCreate => {
            "Olá, {nome}! Sua consulta ({titulo}) foi agendada para {quando}. Até breve!"
        }
        NotificationKind::Reminder24h => {
            "Olá, {nome}! Lembrete: você tem {titulo} amanhã, {quando}. Se precisar remarcar, responda esta mensagem."
        }
    }
}

/// `dd/mm/YYYY às HH:MM` in the payload's timezone, or `fallback` when the
/// label is not a known zone.
pub fn localized_time(at: DateTime<Utc>, timezone: &str, fallback: Tz) -> String {
    let tz = timezone.parse::<Tz>().unwrap_or(fallback);
    at.with_timezone(&tz).format("%d/%m/%Y às %H:%M").to_string()
}

/// Literal payload text wins over the template.
pub fn render(kind: NotificationKind, payload: &NotificationPayload, fallback: Tz) -> String {
    if let Some(text) = payload.text.as_deref().filter(|t| !t.trim().is_empty()) {
        return text.to_string();
    }

    let name = payload
        .recipient_name
        .split_whitespace()
        .next()
        .unwrap_or("paciente");

    template(kind)
        .replace("{nome}", name)
        .replace("{titulo}", &payload.title)
        .replace(
            "{quando}",
            &localized_time(payload.appointment_start, &payload.timezone, fallback),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn payload(text: Option<&str>, timezone: &str) -> NotificationPayload {
        NotificationPayload {
            to: "5511999990000".to_string(),
            recipient_name: "Maria Souza".to_string(),
            appointment_start: Utc.with_ymd_and_hms(2026, 5, 4, 12, 30, 0).unwrap(),
            timezone: timezone.to_string(),
            title: "Consulta".to_string(),
            text: text.map(str::to_string),
        }
    }

    #[test]
    fn reminder_uses_local_time() {
        let text = render(
            NotificationKind::Reminder24h,
            &payload(None, "America/Sao_Paulo"),
            chrono_tz::UTC,
        );
        assert_eq!(
            text,
            "Olá, Maria! Lembrete: você tem Consulta amanhã, 04/05/2026 às 09:30. Se precisar remarcar, responda esta mensagem."
        );
    }

    #[test]
    fn unknown_timezone_falls_back_to_clinic_zone() {
        let when = localized_time(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 30, 0).unwrap(),
            "Mars/Olympus",
            chrono_tz::America::Sao_Paulo,
        );
        assert_eq!(when, "04/05/2026 às 09:30");
    }

    #[test]
    fn literal_text_is_sent_as_is() {
        let text = render(
            NotificationKind::ConfirmationOnCreate,
            &payload(Some("Texto livre"), "America/Sao_Paulo"),
            chrono_tz::UTC,
        );
        assert_eq!(text, "Texto livre");
    }
}

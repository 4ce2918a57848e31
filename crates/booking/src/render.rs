use chrono::{DateTime, Utc};
use fcb_config::ClassConfig;
use fcb_models::TicketDetail;
use qrcode::QrCode;
use qrcode::render::svg;

use crate::error::{BookingError, Result};

const CLUB_NAME: &str = "FC Bažantnice";

/// A rendered ticket, ready to attach to an email.
#[derive(Debug, Clone)]
pub struct TicketDocument {
    pub filename: String,
    pub html: String,
    pub verification_url: String,
}

/// Renders ticket documents with a QR code pointing at the verification page.
#[derive(Debug, Clone)]
pub struct TicketRenderer {
    base_url: String,
    classes: Vec<ClassConfig>,
}

impl TicketRenderer {
    pub fn new(base_url: impl Into<String>, classes: Vec<ClassConfig>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, classes }
    }

    /// URL the gate staff scan. Carries the class code, so the page can show
    /// the entrance without a lookup.
    pub fn verification_url(&self, detail: &TicketDetail) -> String {
        let code = self
            .classes
            .iter()
            .find(|c| c.name == detail.class)
            .map(|c| c.code.as_str())
            .unwrap_or(detail.class.as_str());
        format!(
            "{}/ticket.html?class={}&reservation={}",
            self.base_url,
            urlencoding::encode(code),
            detail.reservation_id
        )
    }

    pub fn render(
        &self,
        detail: &TicketDetail,
        issued_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<TicketDocument> {
        let verification_url = self.verification_url(detail);
        let qr = QrCode::new(verification_url.as_bytes())
            .map_err(|e| BookingError::ExternalService(format!("QR code generation failed: {e}")))?;
        let qr_svg = qr
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .quiet_zone(true)
            .build();

        let html = format!(
            r#"<!DOCTYPE html>
<html lang="cs">
<head><meta charset="utf-8"><title>Vstupenka {club}</title></head>
<body style="font-family: sans-serif; max-width: 420px; margin: 0 auto;">
<h1>Vstupenka {club}</h1>
<h2>{title}</h2>
<p>{date} {time}</p>
<table>
<tr><th align="left">Jméno</th><td>{name}</td></tr>
<tr><th align="left">Třída</th><td>{class}</td></tr>
<tr><th align="left">Rezervace</th><td>#{id}</td></tr>
<tr><th align="left">Platnost</th><td>{from} – {until}</td></tr>
</table>
<div>{qr}</div>
</body>
</html>
"#,
            club = CLUB_NAME,
            title = escape_html(&detail.title),
            date = escape_html(&detail.date),
            time = escape_html(&detail.time),
            name = escape_html(&detail.name),
            class = escape_html(&detail.class),
            id = detail.reservation_id,
            from = issued_at.format("%d.%m.%Y"),
            until = valid_until.format("%d.%m.%Y"),
            qr = qr_svg,
        );

        Ok(TicketDocument {
            filename: format!("vstupenka-{}.html", detail.reservation_id),
            html,
            verification_url,
        })
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

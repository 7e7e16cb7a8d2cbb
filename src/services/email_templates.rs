//! Import notification templates (pt-BR).
//!
//! `render()` returns an `EmailMessage` ready for `MailQueue::queue`.

use crate::services::email_sender::EmailMessage;
use crate::types::ImportResult;

/// Generic reason given to the owner when an import is abandoned
pub const IMPORT_FAILED_MESSAGE: &str =
    "Não foi possível processar o arquivo de colaboradores.";

// =============================================================================
// Import succeeded
// =============================================================================

pub struct ImportedEmail<'a> {
    pub to: &'a str,
    pub result: ImportResult,
}

impl<'a> ImportedEmail<'a> {
    pub fn render(&self) -> EmailMessage {
        let r = &self.result;
        let html = format!(
            r#"<p>Processamento realizado com sucesso</p>
<ul>
<li>Total processados: {total}</li>
<li>Criados: {created}</li>
<li>Atualizados: {updated}</li>
<li>Ignorados: {skipped}</li>
</ul>"#,
            total = r.total(),
            created = r.created,
            updated = r.updated,
            skipped = r.skipped,
        );
        let text = format!(
            "Processamento realizado com sucesso\n\n- Total processados: {}\n- Criados: {}\n- Atualizados: {}\n- Ignorados: {}\n",
            r.total(),
            r.created,
            r.updated,
            r.skipped,
        );

        EmailMessage {
            to: self.to.to_string(),
            subject: "Colaboradores importados".to_string(),
            html,
            text,
        }
    }
}

// =============================================================================
// Import failed
// =============================================================================

pub struct ImportFailedEmail<'a> {
    pub to: &'a str,
    pub file_name: &'a str,
    pub error_message: &'a str,
}

impl<'a> ImportFailedEmail<'a> {
    pub fn render(&self) -> EmailMessage {
        let mut html = String::from("<p>O processamento da importação de colaboradores falhou.</p>\n");
        let mut text = String::from("O processamento da importação de colaboradores falhou.\n\n");

        if !self.file_name.is_empty() {
            html.push_str(&format!("<ul><li>Arquivo: {}</li></ul>\n", escape_html(self.file_name)));
            text.push_str(&format!("- Arquivo: {}\n", self.file_name));
        }
        if !self.error_message.is_empty() {
            html.push_str(&format!(
                "<p><strong>Detalhes do erro:</strong> {}</p>\n",
                escape_html(self.error_message)
            ));
            text.push_str(&format!("Detalhes do erro: {}\n", self.error_message));
        }
        html.push_str("<p>Por favor, verifique o arquivo e tente novamente.</p>");
        text.push_str("\nPor favor, verifique o arquivo e tente novamente.\n");

        EmailMessage {
            to: self.to.to_string(),
            subject: "Falha na importação de colaboradores".to_string(),
            html,
            text,
        }
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

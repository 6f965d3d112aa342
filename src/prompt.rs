//! Fixed prompt templates.
//!
//! Templates are resolved once from configuration at startup and are not
//! changeable while the process runs. Placeholders are plain `{name}` tokens
//! replaced verbatim.

use crate::config::ChatConfig;
use crate::models::Message;

pub const CONTEXT_PLACEHOLDER: &str = "{context_str}";
pub const QUESTION_PLACEHOLDER: &str = "{question}";
pub const HISTORY_PLACEHOLDER: &str = "{chat_history}";
pub const LANGUAGE_PLACEHOLDER: &str = "{language}";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a multi-lingual expert system with knowledge based on the canteen data \
you are given. Always try to be helpful. If you don't know the answer, say that \
you DON'T KNOW.

Bahasa utama yang Anda gunakan adalah {language}.
Tugas Anda adalah untuk menjadi pelayan kantin yang ramah.
Kantin yang Anda layani adalah kantin kampus Universitas Kristen Petra Surabaya.
Setiap gedung utama (Gedung T, Gedung W, Gedung P, dan Gedung Q) memiliki kantin.

Arahkanlah mahasiswa dan staff yang lapar ke kantin dan stall yang tepat \
berdasarkan keinginan mereka. Berikan 3 hingga 5 rekomendasi makanan dan minuman \
yang relevan, lengkap dengan detailnya.

Contoh:
User: Aku lapar, makan mie di mana ya?
Assistant: Kamu lagi di gedung mana?
User: Gedung P
Assistant: Di Gedung P ada 2 stall yang menjual mie goreng: Ndokee Express \
(sekitar 12.000 rupiah) dan Soto Ayam Jago (sekitar 16.000 rupiah).";

const DEFAULT_CONTEXT_TEMPLATE: &str = "\
Here are the relevant canteen records for this question:

{context_str}

Answer using both the records above and the earlier turns of this \
conversation. If the records do not contain the answer, say so.";

const DEFAULT_CONDENSE_TEMPLATE: &str = "\
Given the following conversation between a user and an assistant and a follow \
up question from the user, rephrase the follow up question to be a standalone \
question. Reply with the question only.

Chat History:
{chat_history}

Follow Up Input: {question}
Standalone question:";

/// The three templates a chat engine needs, with persona placeholders
/// already filled in.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    system_prompt: String,
    context_template: String,
    condense_template: String,
}

impl PromptTemplates {
    pub fn from_config(config: &ChatConfig) -> Self {
        let system = config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Self {
            system_prompt: system.replace(LANGUAGE_PLACEHOLDER, &config.language),
            context_template: config
                .context_template
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTEXT_TEMPLATE.to_string()),
            condense_template: config
                .condense_template
                .clone()
                .unwrap_or_else(|| DEFAULT_CONDENSE_TEMPLATE.to_string()),
        }
    }

    /// System message for a generation: persona followed by the rendered
    /// context template.
    pub fn system_message(&self, context_str: &str) -> String {
        let context = self.context_template.replace(CONTEXT_PLACEHOLDER, context_str);
        format!("{}\n\n{}", self.system_prompt.trim_end(), context)
    }

    pub fn condense_prompt(&self, history: &[Message], question: &str) -> String {
        self.condense_template
            .replace(HISTORY_PLACEHOLDER, &format_history(history))
            .replace(QUESTION_PLACEHOLDER, question)
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

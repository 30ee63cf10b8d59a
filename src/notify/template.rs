/// Message templates and placeholder rendering
///
/// Placeholders use `{{ key }}` syntax where `key` is a dotted path into the
/// execution context (`{{ borrower.email }}`). String values are inserted
/// verbatim, other JSON values in their compact JSON form.

use crate::{
    error::{StepError, StorageError},
    store::{format_ts, Database},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub key: String,
    pub subject: String,
    pub body: String,
}

impl MessageTemplate {
    pub fn new(key: &str, subject: &str, body: &str) -> Self {
        Self {
            key: key.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }
}

/// Templates referenced by `send_email` steps
#[derive(Debug, Clone)]
pub struct TemplateStore {
    pool: SqlitePool,
}

impl TemplateStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    pub async fn upsert(&self, template: &MessageTemplate) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO message_templates (key, subject, body, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                subject = excluded.subject,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&template.key)
        .bind(&template.subject)
        .bind(&template.body)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        tracing::debug!("📝 Stored message template '{}'", template.key);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<MessageTemplate>, StorageError> {
        let row = sqlx::query("SELECT key, subject, body FROM message_templates WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(MessageTemplate {
                key: row.try_get("key")?,
                subject: row.try_get("subject")?,
                body: row.try_get("body")?,
            })),
            None => Ok(None),
        }
    }
}

/// Substitute context values into `{{ path }}` placeholders
///
/// Unknown paths and unterminated placeholders are errors; a message with a
/// hole in it is never sent.
pub fn render(template: &str, context: &Map<String, Value>) -> Result<String, StepError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let close = after_open
            .find("}}")
            .ok_or_else(|| StepError::Render(format!("unterminated placeholder in '{template}'")))?;

        let path = after_open[..close].trim();
        if path.is_empty() {
            return Err(StepError::Render("empty placeholder".to_string()));
        }

        let value = lookup(context, path)
            .ok_or_else(|| StepError::Render(format!("unknown placeholder '{path}'")))?;

        match value {
            Value::String(s) => output.push_str(s),
            other => output.push_str(&other.to_string()),
        }

        rest = &after_open[close + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Map<String, Value> {
        json!({
            "target_id": "42",
            "amount": 250000,
            "borrower": { "name": "Ada Lovelace", "email": "ada@example.com" },
            "co_borrowers": [{ "name": "Charles" }]
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn renders_nested_paths_and_non_strings() {
        let rendered = render(
            "Dear {{ borrower.name }}, loan #{{target_id}} for {{ amount }} (with {{ co_borrowers.0.name }})",
            &context(),
        )
        .unwrap();

        assert_eq!(rendered, "Dear Ada Lovelace, loan #42 for 250000 (with Charles)");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render("plain { text }", &context()).unwrap(), "plain { text }");
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let err = render("Hi {{ borrower.phone }}", &context()).unwrap_err();
        assert!(err.to_string().contains("borrower.phone"));
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        assert!(matches!(render("Hi {{ borrower.name", &context()), Err(StepError::Render(_))));
        assert!(matches!(render("Hi {{ }}", &context()), Err(StepError::Render(_))));
    }

    #[tokio::test]
    async fn store_upserts_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("templates.db"), 1).await.unwrap();
        let store = TemplateStore::new(&db);

        store
            .upsert(&MessageTemplate::new("approved", "Approved", "Congrats {{ borrower.name }}"))
            .await
            .unwrap();
        store
            .upsert(&MessageTemplate::new("approved", "Your loan is approved", "Congrats"))
            .await
            .unwrap();

        let template = store.get("approved").await.unwrap().unwrap();
        assert_eq!(template.subject, "Your loan is approved");
        assert!(store.get("missing").await.unwrap().is_none());
    }
}

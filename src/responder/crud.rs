//! Save and delete actions for resource types that need nothing beyond permitted fields and rules.

use super::action::{ActionOutput, ActionResponder, InstanceAction};
use crate::case::to_snake_case;
use crate::error::ApiError;
use crate::record::Record;
use crate::response::ResultEnvelope;
use crate::validation::RecordValidator;
use async_trait::async_trait;
use serde_json::Value;

/// Copies permitted fields from the params onto the instance, validates, and saves it.
/// Serves creation too: `create` hands it a blank instance.
#[derive(Clone, Debug, Default)]
pub struct SaveAction {
    fields: Vec<String>,
    validator: RecordValidator,
    keep_whitespace: bool,
}

impl SaveAction {
    pub fn new(fields: &[&str]) -> Self {
        SaveAction {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn validator(mut self, validator: RecordValidator) -> Self {
        self.validator = validator;
        self
    }

    /// String params are trimmed unless this is set.
    pub fn keep_whitespace(mut self) -> Self {
        self.keep_whitespace = true;
        self
    }
}

#[async_trait]
impl InstanceAction for SaveAction {
    async fn call(&self, rsp: &mut ActionResponder, mut instance: Record) -> Result<ActionOutput, ApiError> {
        // attributes may be nested under the resource key, e.g. {"ticket": {...}}
        let key = to_snake_case(rsp.resource_type());
        let data = match rsp.params().get(&key) {
            Some(Value::Object(nested)) => nested.clone(),
            _ => rsp.params().clone(),
        };
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        instance.update_fields_from(&data, &fields, !self.keep_whitespace);

        if !self.validator.validate(&mut instance) {
            return Ok(ResultEnvelope::invalid(instance).into());
        }
        let saved = rsp
            .authorized_transaction(instance, None, |tx, mut record| async move {
                tx.save(&mut record).await?;
                Ok::<_, ApiError>(record)
            })
            .await?;
        Ok(ActionOutput::Record(saved))
    }
}

/// Deletes the instance; the deleted record is returned as data.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteAction;

#[async_trait]
impl InstanceAction for DeleteAction {
    async fn call(&self, rsp: &mut ActionResponder, instance: Record) -> Result<ActionOutput, ApiError> {
        let deleted = rsp
            .authorized_transaction(instance, None, |tx, record| async move {
                tx.delete(&record).await?;
                Ok::<_, ApiError>(record)
            })
            .await?;
        Ok(ActionOutput::Record(deleted))
    }
}

//! Recurring event definitions.

use std::sync::Arc;

use chrono::Weekday;
use tracing::debug;

use crate::dates::{weekday_from_index, weekday_index};
use crate::error::{Result, ResultExt, RollcallError};
use crate::events::keys;
use crate::store::{Batch, KvStore};

/// A named event that repeats on fixed weekdays at midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringEventTemplate {
    pub id: String,
    pub name: String,
    /// Distinct, ordered Sunday first.
    pub weekdays: Vec<Weekday>,
}

impl RecurringEventTemplate {
    /// Build a template, sorting and de-duplicating `weekdays`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        weekdays: impl IntoIterator<Item = Weekday>,
    ) -> Result<Self> {
        let id = id.into();
        let weekdays = normalize(&id, weekdays)?;
        Ok(Self {
            id,
            name: name.into(),
            weekdays,
        })
    }
}

fn normalize(id: &str, weekdays: impl IntoIterator<Item = Weekday>) -> Result<Vec<Weekday>> {
    let mut days: Vec<Weekday> = weekdays.into_iter().collect();
    days.sort_by_key(|d| weekday_index(*d));
    days.dedup();
    if days.is_empty() {
        return Err(RollcallError::EmptyWeekdays(id.to_owned()));
    }
    Ok(days)
}

/// Encode weekdays as comma separated indices, e.g. `"1,3"`.
pub fn serialize_weekdays(weekdays: &[Weekday]) -> String {
    weekdays
        .iter()
        .map(|d| weekday_index(*d).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode the output of [`serialize_weekdays`].
///
/// Every element must be an integer from 0 (Sunday) to 6 (Saturday).
pub fn deserialize_weekdays(raw: &str) -> Result<Vec<Weekday>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .ok()
                .and_then(weekday_from_index)
                .ok_or_else(|| RollcallError::InvalidWeekday(part.to_owned()))
        })
        .collect()
}

/// Reads and writes [`RecurringEventTemplate`] records.
pub struct TemplateStore<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for TemplateStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore + ?Sized> TemplateStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Write the template and add it to the recurring index.
    pub fn upsert(&self, template: &RecurringEventTemplate) -> Result<()> {
        let weekdays = normalize(&template.id, template.weekdays.iter().copied())?;
        let key = keys::recurring_key(&template.id);
        let batch = Batch::new()
            .hset(&key, "id", &template.id)
            .hset(&key, "name", &template.name)
            .hset(&key, "weekdays", serialize_weekdays(&weekdays))
            .sadd(keys::RECURRING_INDEX, &template.id);

        self.store
            .exec(&batch)
            .map_err(|source| RollcallError::Batch {
                batch: format!("upsert recurring event {}", template.id),
                source,
            })?;
        debug!(template_id = %template.id, "saved recurring event");
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<RecurringEventTemplate> {
        let key = keys::recurring_key(id);
        let mut fields = self.store.hgetall(&key)?;
        if fields.is_empty() {
            return Err(RollcallError::NotFound {
                kind: "recurring event",
                id: id.to_owned(),
            });
        }

        let raw_weekdays = fields.remove("weekdays").unwrap_or_default();
        let weekdays = deserialize_weekdays(&raw_weekdays)
            .with_context(|| format!("decode weekdays of {key}"))?;
        Ok(RecurringEventTemplate {
            id: fields.remove("id").unwrap_or_else(|| id.to_owned()),
            name: fields.remove("name").unwrap_or_default(),
            weekdays,
        })
    }

    /// Every template in the recurring index, ordered by id.
    pub fn list_all(&self) -> Result<Vec<RecurringEventTemplate>> {
        self.store
            .smembers(keys::RECURRING_INDEX)?
            .iter()
            .map(|id| {
                self.get_by_id(id)
                    .with_context(|| format!("get recurring event {id}"))
            })
            .collect()
    }
}

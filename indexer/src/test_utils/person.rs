//! A small person model exercising grouping, restriction and serialization failures.

use chrono::{DateTime, TimeZone, Utc};
use serde::ser::Error as _;
use serde::{Serialize, Serializer};

use crate::error::IndexerResult;
use crate::index::document::{IndexedEntity, SerdeDocumentMapper};
use crate::normalizer::EntityNormalizer;
use crate::types::ChangeRow;

/// Replication time used as the reference point of test data.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// One row of the denormalized person view. A person spans one row per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRow {
    pub id: String,
    pub value: String,
    pub replicated_at: DateTime<Utc>,
    pub restricted: bool,
    /// Makes the normalized person fail serialization.
    pub corrupt: bool,
}

impl PersonRow {
    pub fn new(id: &str, value: &str, replicated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            value: value.to_string(),
            replicated_at,
            restricted: false,
            corrupt: false,
        }
    }

    pub fn corrupt(id: &str, replicated_at: DateTime<Utc>) -> Self {
        Self {
            corrupt: true,
            ..Self::new(id, "corrupt", replicated_at)
        }
    }

    pub fn restricted(id: &str, value: &str, replicated_at: DateTime<Utc>) -> Self {
        Self {
            restricted: true,
            ..Self::new(id, value, replicated_at)
        }
    }
}

impl ChangeRow for PersonRow {
    fn group_key(&self) -> &str {
        &self.id
    }

    fn replicated_at(&self) -> DateTime<Utc> {
        self.replicated_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: String,
    pub values: Vec<String>,
    #[serde(skip)]
    pub restricted: bool,
    #[serde(
        skip_serializing_if = "is_false",
        serialize_with = "fail_when_corrupt"
    )]
    pub corrupt: bool,
}

impl Person {
    pub fn new(id: &str, values: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            values: values.iter().map(|value| value.to_string()).collect(),
            restricted: false,
            corrupt: false,
        }
    }

    pub fn unserializable(id: &str) -> Self {
        Self {
            corrupt: true,
            ..Self::new(id, &[])
        }
    }
}

impl IndexedEntity for Person {
    fn document_id(&self) -> String {
        self.id.clone()
    }

    fn is_restricted(&self) -> bool {
        self.restricted
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn fail_when_corrupt<S: Serializer>(corrupt: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    if *corrupt {
        return Err(S::Error::custom("person record is corrupt"));
    }

    serializer.serialize_bool(false)
}

/// Collects the values of consecutive rows of one person.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonNormalizer;

impl EntityNormalizer<PersonRow> for PersonNormalizer {
    type Entity = Person;

    fn reduce(&self, rows: Vec<PersonRow>) -> IndexerResult<Person> {
        let mut person = Person::new("", &[]);

        for row in rows {
            person.id = row.id;
            person.restricted |= row.restricted;
            person.corrupt |= row.corrupt;
            person.values.push(row.value);
        }

        Ok(person)
    }
}

pub type PersonMapper = SerdeDocumentMapper<Person>;

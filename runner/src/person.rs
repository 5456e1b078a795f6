//! Person entity indexed from the denormalized person search view.

use chrono::{DateTime, Utc};
use indexer::error::{ErrorKind, IndexerResult};
use indexer::index::IndexAction;
use indexer::index::document::{DocumentMapper, MappingContext};
use indexer::normalizer::EntityNormalizer;
use indexer::reference::ReferenceDataCache;
use indexer::source::postgres::PgSourceQueries;
use indexer::types::ChangeRow;
use indexer::{bail, indexer_error};
use serde::Serialize;

pub const PERSON_JOB: &str = "person";

const VIEW_COLUMNS: &str = "person_id, replicated_at, first_name, last_name, alias, \
                            birth_date, gender_code, sealed";

/// Queries reading `person_search_view`, one row per person and alias.
///
/// An incremental pull returns every row of each person with at least one changed row. The
/// document replaces the stored aliases, so pulling only the changed rows would drop the others.
pub fn person_queries() -> PgSourceQueries {
    PgSourceQueries {
        changed_since: format!(
            "select {VIEW_COLUMNS} from person_search_view \
             where person_id in (\
                 select person_id from person_search_view where replicated_at >= $1\
             ) \
             order by person_id, alias nulls first"
        ),
        range: format!(
            "select {VIEW_COLUMNS} from person_search_view \
             where ($1::text is null or person_id >= $1) and ($2::text is null or person_id < $2) \
             order by person_id, alias nulls first"
        ),
        by_ids: format!(
            "select {VIEW_COLUMNS} from person_search_view \
             where person_id = any($1) order by person_id, alias nulls first"
        ),
        id_column: "person_id".to_string(),
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersonViewRow {
    pub person_id: String,
    pub replicated_at: DateTime<Utc>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub alias: Option<String>,
    pub birth_date: Option<chrono::NaiveDate>,
    pub gender_code: Option<i32>,
    pub sealed: bool,
}

impl ChangeRow for PersonViewRow {
    fn group_key(&self) -> &str {
        &self.person_id
    }

    fn replicated_at(&self) -> DateTime<Utc> {
        self.replicated_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub aliases: Vec<String>,
    pub birth_date: Option<chrono::NaiveDate>,
    pub gender_code: Option<i32>,
    pub sealed: bool,
}

/// Folds the alias rows of a person into one record. Person columns repeat on every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonViewNormalizer;

impl EntityNormalizer<PersonViewRow> for PersonViewNormalizer {
    type Entity = PersonRecord;

    fn reduce(&self, rows: Vec<PersonViewRow>) -> IndexerResult<PersonRecord> {
        let mut rows = rows.into_iter();
        let Some(first) = rows.next() else {
            bail!(ErrorKind::InvalidState, "No row to normalize");
        };

        let mut record = PersonRecord {
            id: first.person_id,
            first_name: first.first_name,
            last_name: first.last_name,
            aliases: first.alias.into_iter().collect(),
            birth_date: first.birth_date,
            gender_code: first.gender_code,
            sealed: first.sealed,
        };

        for row in rows {
            record.sealed |= row.sealed;
            if let Some(alias) = row.alias
                && !record.aliases.contains(&alias)
            {
                record.aliases.push(alias);
            }
        }

        Ok(record)
    }
}

#[derive(Debug, Serialize)]
struct PersonDocument<'a> {
    id: &'a str,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    full_name: Option<String>,
    aliases: &'a [String],
    birth_date: Option<chrono::NaiveDate>,
    gender: Option<String>,
}

/// Maps person records to search documents, resolving coded values through the reference data.
#[derive(Debug, Clone)]
pub struct PersonDocumentMapper {
    reference_data: ReferenceDataCache,
}

impl PersonDocumentMapper {
    pub fn new(reference_data: ReferenceDataCache) -> Self {
        Self { reference_data }
    }
}

impl DocumentMapper<PersonRecord> for PersonDocumentMapper {
    fn to_action(
        &self,
        person: &PersonRecord,
        context: &MappingContext,
    ) -> IndexerResult<IndexAction> {
        if person.sealed && !context.include_restricted {
            return Ok(IndexAction::Delete {
                id: person.id.clone(),
            });
        }

        let full_name = match (&person.first_name, &person.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(name), None) | (None, Some(name)) => Some(name.clone()),
            (None, None) => None,
        };

        let document = PersonDocument {
            id: &person.id,
            first_name: person.first_name.as_deref(),
            last_name: person.last_name.as_deref(),
            full_name,
            aliases: &person.aliases,
            birth_date: person.birth_date,
            gender: person
                .gender_code
                .and_then(|code| self.reference_data.description(code)),
        };

        let document = serde_json::to_value(&document).map_err(|err| {
            indexer_error!(
                ErrorKind::DocumentSerializationError,
                "Person could not be serialized",
                person.id.clone(),
                source: err
            )
        })?;

        Ok(IndexAction::Upsert {
            id: person.id.clone(),
            document,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use indexer::reference::{ReferenceDataLoader, SystemCode};
    use serde_json::json;

    use super::*;

    struct GenderCodes;

    #[async_trait]
    impl ReferenceDataLoader for GenderCodes {
        async fn load(&self) -> IndexerResult<Vec<SystemCode>> {
            Ok(vec![SystemCode {
                id: 1,
                category: "GENDER".to_string(),
                short_description: "Female".to_string(),
            }])
        }
    }

    fn row(alias: Option<&str>, sealed: bool) -> PersonViewRow {
        row_at(alias, sealed, Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap())
    }

    fn row_at(alias: Option<&str>, sealed: bool, replicated_at: DateTime<Utc>) -> PersonViewRow {
        PersonViewRow {
            person_id: "P1".to_string(),
            replicated_at,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            alias: alias.map(str::to_string),
            birth_date: None,
            gender_code: Some(1),
            sealed,
        }
    }

    #[test]
    fn alias_rows_fold_into_one_record() {
        let record = PersonViewNormalizer
            .reduce(vec![
                row(Some("Countess"), false),
                row(Some("Countess"), false),
                row(Some("Ada King"), true),
            ])
            .unwrap();

        assert_eq!(record.aliases, vec!["Countess", "Ada King"]);
        assert!(record.sealed);
    }

    #[test]
    fn incremental_pull_selects_whole_changed_people() {
        let changed_since = person_queries().changed_since;
        let (outer, changed) = changed_since
            .split_once("where person_id in (")
            .expect("changed people subquery");

        assert!(!outer.contains("replicated_at >= $1"));
        assert!(changed.contains("where replicated_at >= $1"));
        assert!(changed.contains("order by person_id, alias nulls first"));
    }

    #[tokio::test]
    async fn unchanged_alias_survives_incremental_document() {
        let checkpoint = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        let mapper = PersonDocumentMapper::new(ReferenceDataCache::new(GenderCodes));
        // Both rows of the person come back although only the second one changed.
        let record = PersonViewNormalizer
            .reduce(vec![
                row_at(Some("Countess"), false, checkpoint - chrono::Duration::days(30)),
                row_at(Some("Ada King"), false, checkpoint + chrono::Duration::days(1)),
            ])
            .unwrap();

        let action = mapper.to_action(&record, &MappingContext::default()).unwrap();

        let IndexAction::Upsert { document, .. } = action else {
            panic!("expected an upsert");
        };
        assert_eq!(document["aliases"], json!(["Countess", "Ada King"]));
    }

    #[tokio::test]
    async fn document_resolves_gender_description() {
        let cache = ReferenceDataCache::new(GenderCodes);
        cache.refresh().await.unwrap();
        let mapper = PersonDocumentMapper::new(cache);
        let record = PersonViewNormalizer.reduce(vec![row(None, false)]).unwrap();

        let action = mapper.to_action(&record, &MappingContext::default()).unwrap();

        let IndexAction::Upsert { document, .. } = action else {
            panic!("expected an upsert");
        };
        assert_eq!(document["full_name"], json!("Ada Lovelace"));
        assert_eq!(document["gender"], json!("Female"));
    }

    #[test]
    fn sealed_person_is_deleted_unless_included() {
        let cache = ReferenceDataCache::new(GenderCodes);
        let mapper = PersonDocumentMapper::new(cache);
        let record = PersonViewNormalizer.reduce(vec![row(None, true)]).unwrap();

        let excluded = mapper.to_action(&record, &MappingContext::default()).unwrap();
        let included = mapper
            .to_action(
                &record,
                &MappingContext {
                    include_restricted: true,
                },
            )
            .unwrap();

        assert!(excluded.is_delete());
        assert!(!included.is_delete());
    }
}

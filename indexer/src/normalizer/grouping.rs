use crate::error::IndexerResult;
use crate::normalizer::EntityNormalizer;
use crate::types::ChangeRow;

/// Single-pass regrouping of a row stream into entities.
///
/// The reducer keeps the group key of the rows accumulated so far. A row with a different key
/// closes the current group, which is reduced and returned before the new row is absorbed.
/// Rows of one key must arrive contiguously; a key seen again after another key starts a new
/// entity.
#[derive(Debug)]
pub struct GroupReducer<'a, N, R> {
    normalizer: &'a N,
    current_key: Option<String>,
    accumulator: Vec<R>,
}

impl<'a, N, R> GroupReducer<'a, N, R>
where
    R: ChangeRow,
    N: EntityNormalizer<R>,
{
    pub fn new(normalizer: &'a N) -> Self {
        Self {
            normalizer,
            current_key: None,
            accumulator: Vec::new(),
        }
    }

    /// Absorbs a row, returning the entity of the group it closed if any.
    pub fn push(&mut self, row: R) -> IndexerResult<Option<N::Entity>> {
        if !self.normalizer.groups_rows() {
            return self.normalizer.reduce(vec![row]).map(Some);
        }

        let same_group = self.current_key.as_deref() == Some(row.group_key());
        let emitted = if !same_group && !self.accumulator.is_empty() {
            Some(self.reduce_accumulated()?)
        } else {
            None
        };

        if !same_group {
            self.current_key = Some(row.group_key().to_string());
        }
        self.accumulator.push(row);

        Ok(emitted)
    }

    /// Reduces whatever is still accumulated at the end of the stream.
    pub fn finish(mut self) -> IndexerResult<Option<N::Entity>> {
        if self.accumulator.is_empty() {
            return Ok(None);
        }

        self.reduce_accumulated().map(Some)
    }

    /// Returns the number of rows waiting for their group to close.
    pub fn pending_rows(&self) -> usize {
        self.accumulator.len()
    }

    fn reduce_accumulated(&mut self) -> IndexerResult<N::Entity> {
        let rows = std::mem::take(&mut self.accumulator);
        self.normalizer.reduce(rows)
    }
}

/// Reduces a complete row list into entities.
pub fn reduce_all<N, R>(normalizer: &N, rows: Vec<R>) -> IndexerResult<Vec<N::Entity>>
where
    R: ChangeRow,
    N: EntityNormalizer<R>,
{
    let mut reducer = GroupReducer::new(normalizer);
    let mut entities = Vec::new();

    for row in rows {
        if let Some(entity) = reducer.push(row)? {
            entities.push(entity);
        }
    }

    if let Some(entity) = reducer.finish()? {
        entities.push(entity);
    }

    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::PassThroughNormalizer;
    use crate::test_utils::person::{PersonNormalizer, PersonRow, base_time};

    fn rows(keys: &[&str]) -> Vec<PersonRow> {
        keys.iter()
            .enumerate()
            .map(|(index, key)| PersonRow::new(key, &format!("v{index}"), base_time()))
            .collect()
    }

    #[test]
    fn one_entity_per_contiguous_run() {
        let entities =
            reduce_all(&PersonNormalizer, rows(&["a", "a", "b", "c", "c", "c"])).unwrap();

        let summary: Vec<(&str, usize)> = entities
            .iter()
            .map(|person| (person.id.as_str(), person.values.len()))
            .collect();
        assert_eq!(summary, vec![("a", 2), ("b", 1), ("c", 3)]);
    }

    #[test]
    fn row_order_is_preserved_within_group() {
        let entities = reduce_all(&PersonNormalizer, rows(&["a", "a", "a"])).unwrap();

        assert_eq!(entities[0].values, vec!["v0", "v1", "v2"]);
    }

    #[test]
    fn non_contiguous_keys_produce_separate_entities() {
        let entities = reduce_all(&PersonNormalizer, rows(&["a", "b", "a"])).unwrap();

        assert_eq!(entities.len(), 3);
    }

    #[test]
    fn empty_stream_emits_nothing() {
        let entities = reduce_all(&PersonNormalizer, Vec::<PersonRow>::new()).unwrap();

        assert!(entities.is_empty());
    }

    #[test]
    fn push_emits_previous_group_on_key_change() {
        let normalizer = PersonNormalizer;
        let mut reducer = GroupReducer::new(&normalizer);
        let mut input = rows(&["a", "a", "b"]).into_iter();

        assert!(reducer.push(input.next().unwrap()).unwrap().is_none());
        assert!(reducer.push(input.next().unwrap()).unwrap().is_none());
        let closed = reducer.push(input.next().unwrap()).unwrap().unwrap();

        assert_eq!(closed.id, "a");
        assert_eq!(reducer.pending_rows(), 1);
        assert_eq!(reducer.finish().unwrap().unwrap().id, "b");
    }

    #[test]
    fn pass_through_skips_grouping() {
        let entities =
            reduce_all(&PassThroughNormalizer::new(), rows(&["a", "a", "b"])).unwrap();

        assert_eq!(entities.len(), 3);
    }
}

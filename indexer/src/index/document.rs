use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use crate::error::{ErrorKind, IndexerResult};
use crate::index::IndexAction;
use crate::indexer_error;

/// Run-level inputs of document mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingContext {
    /// Index access-restricted entities instead of deleting them.
    pub include_restricted: bool,
}

/// Turns a normalized entity into an index action.
///
/// Errors are reported with [`ErrorKind::DocumentSerializationError`]; the publisher decides
/// whether they skip the entity or fail the run.
pub trait DocumentMapper<E>: Send + Sync + 'static {
    fn to_action(&self, entity: &E, context: &MappingContext) -> IndexerResult<IndexAction>;
}

/// An entity that knows its document id and access restrictions.
pub trait IndexedEntity {
    fn document_id(&self) -> String;

    /// Returns true for sealed or sensitive records.
    fn is_restricted(&self) -> bool {
        false
    }
}

/// Maps entities to their serde representation.
///
/// Restricted entities are turned into deletes unless the context includes them, so copies
/// indexed before the restriction applied are purged.
pub struct SerdeDocumentMapper<E> {
    _entity: PhantomData<fn(&E)>,
}

impl<E> SerdeDocumentMapper<E> {
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<E> Default for SerdeDocumentMapper<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for SerdeDocumentMapper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SerdeDocumentMapper")
    }
}

impl<E> DocumentMapper<E> for SerdeDocumentMapper<E>
where
    E: Serialize + IndexedEntity + 'static,
{
    fn to_action(&self, entity: &E, context: &MappingContext) -> IndexerResult<IndexAction> {
        let id = entity.document_id();

        if entity.is_restricted() && !context.include_restricted {
            return Ok(IndexAction::Delete { id });
        }

        let document = serde_json::to_value(entity).map_err(|err| {
            indexer_error!(
                ErrorKind::DocumentSerializationError,
                "Entity could not be serialized",
                format!("document {id}: {err}"),
                source: err
            )
        })?;

        Ok(IndexAction::Upsert { id, document })
    }
}

#[cfg(test)]
mod tests {
    use serde::ser::Error as _;

    use super::*;

    #[derive(Serialize)]
    struct Case {
        id: u32,
        sealed: bool,
    }

    impl IndexedEntity for Case {
        fn document_id(&self) -> String {
            self.id.to_string()
        }

        fn is_restricted(&self) -> bool {
            self.sealed
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("broken"))
        }
    }

    impl IndexedEntity for Unserializable {
        fn document_id(&self) -> String {
            "broken".to_string()
        }
    }

    #[test]
    fn restricted_entities_become_deletes() {
        let mapper = SerdeDocumentMapper::new();
        let sealed = Case { id: 4, sealed: true };

        let excluded = mapper.to_action(&sealed, &MappingContext::default()).unwrap();
        let included = mapper
            .to_action(
                &sealed,
                &MappingContext {
                    include_restricted: true,
                },
            )
            .unwrap();

        assert_eq!(excluded, IndexAction::Delete { id: "4".into() });
        assert!(!included.is_delete());
    }

    #[test]
    fn serialization_failure_has_dedicated_kind() {
        let err = SerdeDocumentMapper::new()
            .to_action(&Unserializable, &MappingContext::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DocumentSerializationError);
    }
}

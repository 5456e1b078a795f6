use std::sync::Arc;

use config::shared::SerializationFailurePolicy;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, IndexerResult};
use crate::index::{IndexAction, IndexClient};
use crate::index::document::{DocumentMapper, MappingContext};
use crate::index::writer::BulkIndexWriter;
use crate::metrics::{INDEXER_DOCUMENTS_PUBLISHED_TOTAL, INDEXER_DOCUMENTS_SKIPPED_TOTAL, JOB_LABEL};
use crate::workers::base::{RunCounters, StageDoneGuard};

/// Maps entities to index actions and hands them to the shared bulk writer.
#[derive(Debug)]
pub struct DocumentPublisher<M, I> {
    job: String,
    mapper: Arc<M>,
    writer: BulkIndexWriter<I>,
    context: MappingContext,
    on_serialization_failure: SerializationFailurePolicy,
    counters: Arc<RunCounters>,
}

impl<M, I> Clone for DocumentPublisher<M, I> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            mapper: self.mapper.clone(),
            writer: self.writer.clone(),
            context: self.context,
            on_serialization_failure: self.on_serialization_failure,
            counters: self.counters.clone(),
        }
    }
}

impl<M, I> DocumentPublisher<M, I>
where
    I: IndexClient + Send + Sync + 'static,
{
    pub fn new(
        job: impl Into<String>,
        mapper: Arc<M>,
        writer: BulkIndexWriter<I>,
        context: MappingContext,
        on_serialization_failure: SerializationFailurePolicy,
        counters: Arc<RunCounters>,
    ) -> Self {
        Self {
            job: job.into(),
            mapper,
            writer,
            context,
            on_serialization_failure,
            counters,
        }
    }

    pub fn writer(&self) -> &BulkIndexWriter<I> {
        &self.writer
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    /// Maps one entity to its index action.
    ///
    /// An entity that cannot be serialized is skipped with a warning, returning `None`, or fails
    /// the call, following the configured policy.
    pub fn map<E>(&self, entity: &E) -> IndexerResult<Option<IndexAction>>
    where
        M: DocumentMapper<E>,
    {
        match self.mapper.to_action(entity, &self.context) {
            Ok(action) => Ok(Some(action)),
            Err(err) if err.kind() == ErrorKind::DocumentSerializationError => {
                match self.on_serialization_failure {
                    SerializationFailurePolicy::Skip => {
                        warn!(job = %self.job, error = %err, "skipping entity that could not be serialized");
                        self.counters.add_documents_skipped(1);
                        counter!(INDEXER_DOCUMENTS_SKIPPED_TOTAL, JOB_LABEL => self.job.clone())
                            .increment(1);

                        Ok(None)
                    }
                    SerializationFailurePolicy::Abort => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Hands already mapped actions to the writer.
    pub async fn submit(&self, actions: Vec<IndexAction>) -> IndexerResult<()> {
        let count = actions.len() as u64;
        self.writer.add_all(actions).await?;
        self.counters.add_documents_published(count);
        counter!(INDEXER_DOCUMENTS_PUBLISHED_TOTAL, JOB_LABEL => self.job.clone()).increment(count);

        Ok(())
    }

    /// Maps one entity and hands its action to the writer.
    pub async fn publish<E>(&self, entity: &E) -> IndexerResult<()>
    where
        M: DocumentMapper<E>,
    {
        match self.map(entity)? {
            Some(action) => self.submit(vec![action]).await,
            None => Ok(()),
        }
    }
}

/// Drains the entity queue into the bulk writer.
///
/// Returns once the queue is closed and empty, or at the first error. Either way the receiver is
/// dropped, which stops the normalizer from waiting on a full queue.
pub async fn run_publisher<E, M, I>(
    publisher: DocumentPublisher<M, I>,
    mut entities: mpsc::Receiver<E>,
    _done: StageDoneGuard,
) -> IndexerResult<()>
where
    E: Send + 'static,
    M: DocumentMapper<E>,
    I: IndexClient + Send + Sync + 'static,
{
    debug!(job = %publisher.job, "publisher started");

    while let Some(entity) = entities.recv().await {
        if let Err(err) = publisher.publish(&entity).await {
            let totals = publisher.counters.totals();
            error!(
                job = %publisher.job,
                published = totals.documents_published,
                skipped = totals.documents_skipped,
                error = %err,
                "publisher stopped"
            );

            return Err(err);
        }
    }

    let totals = publisher.counters.totals();
    info!(
        job = %publisher.job,
        published = totals.documents_published,
        skipped = totals.documents_skipped,
        "publisher finished"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use config::shared::BulkConfig;

    use super::*;
    use crate::index::memory::MemoryIndex;
    use crate::test_utils::person::{Person, PersonMapper};

    fn publisher(
        index: &MemoryIndex,
        policy: SerializationFailurePolicy,
    ) -> DocumentPublisher<PersonMapper, MemoryIndex> {
        DocumentPublisher::new(
            "people",
            Arc::new(PersonMapper::new()),
            BulkIndexWriter::new(index.clone(), "people", &BulkConfig::default()),
            MappingContext::default(),
            policy,
            Arc::new(RunCounters::default()),
        )
    }

    #[tokio::test]
    async fn skip_policy_counts_unserializable_entities() {
        let index = MemoryIndex::new();
        let publisher = publisher(&index, SerializationFailurePolicy::Skip);

        publisher.publish(&Person::unserializable("0001")).await.unwrap();
        publisher.publish(&Person::new("0002", &["a"])).await.unwrap();
        publisher.writer().close().await.unwrap();

        let totals = publisher.counters().totals();
        assert_eq!(totals.documents_skipped, 1);
        assert_eq!(totals.documents_published, 1);
        assert!(index.document("people", "0002").await.is_some());
    }

    #[tokio::test]
    async fn abort_policy_fails_publication() {
        let index = MemoryIndex::new();
        let publisher = publisher(&index, SerializationFailurePolicy::Abort);

        let err = publisher
            .publish(&Person::unserializable("0001"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DocumentSerializationError);
    }
}

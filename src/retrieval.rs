//! Context retrieval for chat questions.
//!
//! [`retrieve_context`] asks a [`Retriever`] for passages relevant to the
//! question and joins them into the context text handed to the chain.
//! [`VectorStoreRetriever`] is the production retriever: it embeds the
//! question and queries the Chroma collection.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::chroma::ChromaClient;
use crate::embedding::Embedder;
use crate::models::Passage;

/// Separator placed between passages in the context text.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Maps a query to an ordered list of relevant passages.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn invoke(&self, question: &str) -> Result<Vec<Passage>>;
}

/// Passages for one question plus their joined text. Built per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalResult {
    pub documents: Vec<Passage>,
    pub context_text: String,
}

/// Retrieve passages for `question` and join them with a blank line.
///
/// Zero passages yield an empty context, not an error. Retriever failures
/// are returned unchanged.
pub async fn retrieve_context(retriever: &dyn Retriever, question: &str) -> Result<RetrievalResult> {
    let documents = retriever.invoke(question).await?;
    let context_text = documents
        .iter()
        .map(|d| d.page_content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    Ok(RetrievalResult {
        documents,
        context_text,
    })
}

/// Retriever over a Chroma collection.
///
/// The collection id is resolved on first use and cached.
pub struct VectorStoreRetriever {
    embedder: Arc<dyn Embedder>,
    chroma: ChromaClient,
    collection: String,
    collection_id: OnceCell<String>,
    k: usize,
}

impl VectorStoreRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, chroma: ChromaClient, collection: String, k: usize) -> Self {
        Self {
            embedder,
            chroma,
            collection,
            collection_id: OnceCell::new(),
            k,
        }
    }
}

#[async_trait]
impl Retriever for VectorStoreRetriever {
    async fn invoke(&self, question: &str) -> Result<Vec<Passage>> {
        let collection_id = self
            .collection_id
            .get_or_try_init(|| self.chroma.get_or_create_collection(&self.collection))
            .await?;
        let query = self.embedder.embed_query(question).await?;
        let documents = self.chroma.query(collection_id, &query, self.k).await?;
        Ok(documents.into_iter().map(Passage::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticRetriever {
        calls: Mutex<Vec<String>>,
        count: usize,
    }

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn invoke(&self, question: &str) -> Result<Vec<Passage>> {
            self.calls.lock().unwrap().push(question.to_string());
            Ok((1..=self.count)
                .map(|i| Passage::new(format!("doc for {} #{}", question, i)))
                .collect())
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn invoke(&self, _question: &str) -> Result<Vec<Passage>> {
            anyhow::bail!("vector store down")
        }
    }

    #[tokio::test]
    async fn test_joins_documents_in_order() {
        let retriever = StaticRetriever {
            calls: Mutex::new(Vec::new()),
            count: 2,
        };
        let result = retrieve_context(&retriever, "question").await.unwrap();
        assert_eq!(result.documents.len(), 2);
        assert_eq!(
            result.context_text,
            "doc for question #1\n\ndoc for question #2"
        );
        assert_eq!(*retriever.calls.lock().unwrap(), vec!["question"]);
    }

    #[tokio::test]
    async fn test_no_documents_is_empty_context() {
        let retriever = StaticRetriever {
            calls: Mutex::new(Vec::new()),
            count: 0,
        };
        let result = retrieve_context(&retriever, "q").await.unwrap();
        assert!(result.documents.is_empty());
        assert_eq!(result.context_text, "");
    }

    #[tokio::test]
    async fn test_single_document_has_no_separator() {
        let retriever = StaticRetriever {
            calls: Mutex::new(Vec::new()),
            count: 1,
        };
        let result = retrieve_context(&retriever, "q").await.unwrap();
        assert_eq!(result.context_text, "doc for q #1");
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let err = retrieve_context(&FailingRetriever, "q").await.unwrap_err();
        assert_eq!(err.to_string(), "vector store down");
    }
}
